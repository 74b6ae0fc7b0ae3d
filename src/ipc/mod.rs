//! Interprocess queues over named shared memory.
//!
//! Every queue maps one region laid out as
//!
//! ```text
//! [0..4)    i32 head   data-relative byte offset of the next read
//! [4..8)    i32 tail   data-relative byte offset of the next write
//! [8..8+Q)  data region
//! ```
//!
//! One side is the owner: it creates and formats the region, and removes
//! the backing object on dispose. The other side only opens and maps it.
//!
//! | Queue | Producers | Framing |
//! |-------|-----------|---------|
//! | [`SlotQueue`] | 1 | fixed slots, length field doubles as commit flag |
//! | [`StreamQueue`] | 1 | densely packed length-prefixed records |
//! | [`MpscQueue`] | many | fixed slots, CAS reservation on the tail |
//!
//! ```no_run
//! use ringqueue::ipc::{SlotQueue, SlotQueueConfig};
//! use ringqueue::RingBuffer;
//!
//! // Consumer process
//! let mut rx = SlotQueue::open("orders", true, SlotQueueConfig::default())?;
//! // Producer process
//! let mut tx = SlotQueue::open("orders", false, SlotQueueConfig::default())?;
//!
//! tx.enqueue(b"new order")?;
//! let mut buf = Vec::new();
//! if rx.dequeue(&mut buf)? {
//!     // handle buf
//! }
//! # Ok::<(), ringqueue::Error>(())
//! ```

pub mod mpsc;
pub(crate) mod slot;
pub mod spsc;
pub mod stream;

use std::sync::atomic::Ordering;

use crate::core::region::{Cursor, Region};
use crate::core::{Result, ShmConfig};

pub use mpsc::{MpscQueue, MpscQueueConfig};
pub use spsc::{SlotQueue, SlotQueueConfig};
pub use stream::{StreamQueue, StreamQueueConfig};

/// Maps the named region. The owner creates it and fills every data word
/// with `fill` before zeroing both cursors.
pub(crate) fn attach(
    shm: &ShmConfig,
    name: &str,
    data_len: usize,
    owner: bool,
    fill: i32,
) -> Result<Region> {
    if owner {
        let region = Region::create(shm, name, data_len)?;
        region.fill_words(fill)?;
        region.store_cursor(Cursor::Head, 0, Ordering::Relaxed);
        region.store_cursor(Cursor::Tail, 0, Ordering::Release);
        log::debug!("created queue `{}` ({} data bytes)", name, data_len);
        Ok(region)
    } else {
        let region = Region::open(shm, name, data_len)?;
        log::debug!("opened queue `{}` ({} data bytes)", name, data_len);
        Ok(region)
    }
}

/// Releases a mapped region, logging instead of failing when run from `Drop`.
pub(crate) fn release_on_drop(region: Option<Region>) {
    if let Some(region) = region {
        let name = region.name().to_string();
        if let Err(err) = region.release() {
            log::warn!("failed to release queue `{}`: {}", name, err);
        }
    }
}
