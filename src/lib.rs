//! Lock-free SPSC and MPSC ring buffers for threads and processes.
//!
//! - [`intra::SpscQueue`]: typed ring in process memory.
//! - [`ipc::SlotQueue`]: fixed-slot byte queue in named shared memory.
//! - [`ipc::StreamQueue`]: densely packed variable-length byte queue.
//! - [`ipc::MpscQueue`]: fixed-slot byte queue for many producers.
//!
//! All of them implement [`RingBuffer`]. Enqueue and dequeue never block;
//! `Ok(false)` means full or empty and is always safe to retry, for example
//! with a [`Poller`].

pub mod core;
pub mod intra;
pub mod ipc;

pub use crate::core::{
    dequeue_blocking, drain, enqueue_blocking, CancellationToken, Error, Poller, Result,
    RingBuffer, ShmConfig, WaitStrategy,
};
pub use intra::SpscQueue;
pub use ipc::{MpscQueue, MpscQueueConfig, SlotQueue, SlotQueueConfig, StreamQueue, StreamQueueConfig};
