//! Fixed-slot multi-producer single-consumer queue over shared memory.
//!
//! Producers claim a slot by advancing the shared tail with a CAS, then
//! write the payload and commit the length field. Claiming and committing
//! are separate steps, so a later slot may commit before an earlier one.
//! The consumer never skips: while the slot at `head` is uncommitted it
//! reports empty, and messages come out in tail-reservation order.
//!
//! Before claiming, a producer needs `slot_size * (max_producers + 1)` free
//! bytes so that every producer racing on the same snapshot still finds room.
//! The data region holds `capacity + max_producers` slots, which leaves room
//! for exactly `capacity` messages under that margin.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::core::frame::FLAG_MSG_UNCOMMITTED;
use crate::core::{Error, Result, RingBuffer, ShmConfig};
use crate::ipc::slot::{SlotLayout, SlotRing};
use crate::ipc::{attach, release_on_drop};

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_MAX_MSG_SIZE: usize = 128;
const DEFAULT_MAX_PRODUCERS: usize = 8;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MpscQueueConfig {
    pub shm: ShmConfig,
    pub capacity: usize,
    pub max_msg_size: usize,
    /// Upper bound on producers enqueueing at the same time.
    pub max_producers: usize,
}

impl Default for MpscQueueConfig {
    fn default() -> Self {
        Self {
            shm: ShmConfig::default(),
            capacity: DEFAULT_CAPACITY,
            max_msg_size: DEFAULT_MAX_MSG_SIZE,
            max_producers: DEFAULT_MAX_PRODUCERS,
        }
    }
}

pub struct MpscQueue {
    name: String,
    owner: bool,
    shm: ShmConfig,
    layout: SlotLayout,
    max_producers: usize,
    ring: Option<SlotRing>,
}

impl MpscQueue {
    pub fn new(name: impl Into<String>, owner: bool, config: MpscQueueConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(Error::InvalidArgument("capacity must be non-zero"));
        }
        if config.max_producers == 0 {
            return Err(Error::InvalidArgument("max_producers must be non-zero"));
        }
        let slots = config
            .capacity
            .checked_add(config.max_producers)
            .ok_or(Error::InvalidArgument("capacity overflows"))?;
        let layout = SlotLayout::new(config.max_msg_size, slots)?;
        Ok(Self {
            name: name.into(),
            owner,
            shm: config.shm,
            layout,
            max_producers: config.max_producers,
            ring: None,
        })
    }

    pub fn open(name: impl Into<String>, owner: bool, config: MpscQueueConfig) -> Result<Self> {
        let mut queue = Self::new(name, owner, config)?;
        queue.init()?;
        Ok(queue)
    }

    /// Enqueues from any thread sharing this handle.
    ///
    /// Returns `Ok(false)` when the free space is below the producer margin.
    /// Oversized payloads fail before any slot is claimed.
    pub fn enqueue(&self, item: &[u8]) -> Result<bool> {
        let ring = self.ring()?;
        self.layout.check_len(item.len())?;
        match ring.reserve(self.max_producers)? {
            Some(placement) => {
                ring.commit(placement, item)?;
                Ok(true)
            }
            None => Ok(false),
        }
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

    pub fn max_producers(&self) -> usize {
        self.max_producers
    }

    pub fn queue_size(&self) -> usize {
        self.layout.queue_size
    }

    /// Bytes reserved by producers and not yet consumed, committed or not.
    pub fn used_bytes(&self) -> Result<usize> {
        self.ring()?.used_bytes()
    }

    fn ring(&self) -> Result<&SlotRing> {
        self.ring.as_ref().ok_or(Error::NotInitialized)
    }
}

impl RingBuffer for MpscQueue {
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
            "mpsc queue `{}`: slot_size={} queue_size={} max_producers={} owner={}",
            self.name,
            self.layout.slot_size,
            self.layout.queue_size,
            self.max_producers,
            self.owner
        );
        self.ring = Some(SlotRing::new(region, self.layout));
        Ok(())
    }

    fn enqueue(&mut self, item: &[u8]) -> Result<bool> {
        MpscQueue::enqueue(self, item)
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

impl Drop for MpscQueue {
    fn drop(&mut self) {
        release_on_drop(self.ring.take().map(SlotRing::into_region));
    }
}
