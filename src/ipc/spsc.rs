//! Fixed-slot single-producer single-consumer queue over shared memory.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::core::frame::FLAG_MSG_UNCOMMITTED;
use crate::core::{Error, Result, RingBuffer, ShmConfig};
use crate::ipc::slot::{SlotLayout, SlotRing};
use crate::ipc::{attach, release_on_drop};

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_MAX_MSG_SIZE: usize = 128;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotQueueConfig {
    pub shm: ShmConfig,
    /// Messages the queue holds before `enqueue` reports full.
    pub capacity: usize,
    /// Largest payload accepted by `enqueue`.
    pub max_msg_size: usize,
}

impl Default for SlotQueueConfig {
    fn default() -> Self {
        Self {
            shm: ShmConfig::default(),
            capacity: DEFAULT_CAPACITY,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
        }
    }
}

/// Each message occupies one slot of `align_up(max_msg_size + 4, 4)` bytes.
///
/// The data region holds `capacity + 1` slots, and an enqueue needs two free
/// slots, so exactly `capacity` messages fit. That is `(capacity + 1) *
/// slot_size` bytes, not `capacity * (slot_size + 1)`. A region sized the
/// latter way is not interchangeable: opening one smaller than this layout
/// fails the size check.
pub struct SlotQueue {
    name: String,
    owner: bool,
    shm: ShmConfig,
    layout: SlotLayout,
    ring: Option<SlotRing>,
}

impl SlotQueue {
    /// Computes the layout without touching shared memory.
    pub fn new(name: impl Into<String>, owner: bool, config: SlotQueueConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(Error::InvalidArgument("capacity must be non-zero"));
        }
        let slots = config
            .capacity
            .checked_add(1)
            .ok_or(Error::InvalidArgument("capacity overflows"))?;
        let layout = SlotLayout::new(config.max_msg_size, slots)?;
        Ok(Self {
            name: name.into(),
            owner,
            shm: config.shm,
            layout,
            ring: None,
        })
    }

    /// `new` followed by `init`.
    pub fn open(name: impl Into<String>, owner: bool, config: SlotQueueConfig) -> Result<Self> {
        let mut queue = Self::new(name, owner, config)?;
        queue.init()?;
        Ok(queue)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_owner(&self) -> bool {
        self.owner
    }

    pub fn slot_size(&self) -> usize {
        self.layout.slot_size
    }

    pub fn max_msg_size(&self) -> usize {
        self.layout.max_msg_size
    }

    /// Size of the data region in bytes.
    pub fn queue_size(&self) -> usize {
        self.layout.queue_size
    }

    pub fn used_bytes(&self) -> Result<usize> {
        self.ring()?.used_bytes()
    }

    fn ring(&self) -> Result<&SlotRing> {
        self.ring.as_ref().ok_or(Error::NotInitialized)
    }
}

impl RingBuffer for SlotQueue {
    type Item = [u8];
    type Output = Vec<u8>;

    fn init(&mut self) -> Result<()> {
        if self.ring.is_some() {
            return Ok(());
        }
        let region = attach(
            &self.shm,
            &self.name,
            self.layout.queue_size,
            self.owner,
            FLAG_MSG_UNCOMMITTED,
        )?;
        log::debug!(
            "slot queue `{}`: slot_size={} queue_size={} owner={}",
            self.name,
            self.layout.slot_size,
            self.layout.queue_size,
            self.owner
        );
        self.ring = Some(SlotRing::new(region, self.layout));
        Ok(())
    }

    fn enqueue(&mut self, item: &[u8]) -> Result<bool> {
        self.ring()?.push(item)
    }

    fn dequeue(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        self.ring()?.pop(out)
    }

    fn head(&self) -> Result<usize> {
        self.ring()?.head()
    }

    fn tail(&self) -> Result<usize> {
        self.ring()?.tail()
    }

    fn dispose(&mut self) -> Result<()> {
        match self.ring.take() {
            Some(ring) => ring.into_region().release(),
            None => Ok(()),
        }
    }
}

impl Drop for SlotQueue {
    fn drop(&mut self) {
        release_on_drop(self.ring.take().map(SlotRing::into_region));
    }
}
