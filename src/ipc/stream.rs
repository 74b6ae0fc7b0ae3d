//! Variable-length single-producer single-consumer queue over shared memory.
//!
//! Records are packed back to back with no padding:
//!
//! ```text
//! record = [i32 length][length bytes of payload]
//! ```
//!
//! Offsets are arbitrary byte positions, so length fields may be misaligned
//! and are accessed with plain unaligned reads and writes. There is no commit
//! flag: the producer publishes `tail` with release ordering only after the
//! whole record is written, and the consumer loads `tail` with acquire. This
//! is only sound with a single producer.
//!
//! When a record does not fit before the end of the region the producer
//! writes `FLAG_WRAPPED` at the old tail (if four bytes remain) and places
//! the record at offset 0. The consumer jumps to 0 on a wrap marker or when
//! fewer than four bytes remain before the end.
//!
//! A record that would run into `head` once placed at 0 is refused, but the
//! producer still moves `tail` to 0 when that leaves the queue consistent.
//! The next `dequeue` follows the wrap, finds nothing at 0 and moves `head`
//! to 0, so a retry after the reader has polled finds the whole region free.

use std::sync::atomic::Ordering;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::core::frame::{
    place_record, used_bytes, LengthField, FLAG_WRAPPED, LENGTH_FIELD_SIZE, MAX_WIRE_LEN,
};
use crate::core::region::{Cursor, Region};
use crate::core::{Error, Result, RingBuffer, ShmConfig};
use crate::ipc::{attach, release_on_drop};

const DEFAULT_QUEUE_SIZE_BYTES: usize = 1000;
const MIN_QUEUE_SIZE_BYTES: usize = 2 * LENGTH_FIELD_SIZE;

#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StreamQueueConfig {
    pub shm: ShmConfig,
    /// Size of the data region in bytes.
    pub queue_size_bytes: usize,
}

impl Default for StreamQueueConfig {
    fn default() -> Self {
        Self {
            shm: ShmConfig::default(),
            queue_size_bytes: DEFAULT_QUEUE_SIZE_BYTES,
        }
    }
}

pub struct StreamQueue {
    name: String,
    owner: bool,
    shm: ShmConfig,
    queue_size: usize,
    region: Option<Region>,
}

impl StreamQueue {
    pub fn new(name: impl Into<String>, owner: bool, config: StreamQueueConfig) -> Result<Self> {
        if config.queue_size_bytes < MIN_QUEUE_SIZE_BYTES {
            return Err(Error::InvalidArgument("queue size too small"));
        }
        if config.queue_size_bytes > MAX_WIRE_LEN {
            return Err(Error::InvalidArgument("queue size exceeds 32-bit cursor range"));
        }
        Ok(Self {
            name: name.into(),
            owner,
            shm: config.shm,
            queue_size: config.queue_size_bytes,
            region: None,
        })
    }

    pub fn open(name: impl Into<String>, owner: bool, config: StreamQueueConfig) -> Result<Self> {
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

    pub fn queue_size(&self) -> usize {
        self.queue_size
    }

    /// Largest payload that can ever be enqueued. An enqueue needs free space
    /// of twice the payload plus the length field.
    pub fn max_payload_len(&self) -> usize {
        (self.queue_size - LENGTH_FIELD_SIZE) / 2
    }

    pub fn used_bytes(&self) -> Result<usize> {
        let region = self.region()?;
        let head = region.load_cursor(Cursor::Head, Ordering::Acquire)?;
        let tail = region.load_cursor(Cursor::Tail, Ordering::Acquire)?;
        Ok(used_bytes(head, tail, self.queue_size))
    }

    fn region(&self) -> Result<&Region> {
        self.region.as_ref().ok_or(Error::NotInitialized)
    }

    /// Moves the tail to 0 without a record so the reader follows it and
    /// frees the space between offset 0 and its head.
    fn wrap_tail(&self, region: &Region, marker: Option<usize>) -> Result<()> {
        if let Some(marker) = marker {
            region.write_i32(marker, FLAG_WRAPPED)?;
        }
        region.store_cursor(Cursor::Tail, 0, Ordering::Release);
        log::trace!("queue `{}` wrapped tail without a record", self.name);
        Ok(())
    }

    fn read_length(&self, region: &Region, offset: usize) -> Result<LengthField> {
        if offset + LENGTH_FIELD_SIZE > self.queue_size {
            return Ok(LengthField::Wrapped);
        }
        LengthField::decode(region.read_i32(offset)?)
    }
}

impl RingBuffer for StreamQueue {
    type Item = [u8];
    type Output = Vec<u8>;

    fn init(&mut self) -> Result<()> {
        if self.region.is_some() {
            return Ok(());
        }
        let region = attach(&self.shm, &self.name, self.queue_size, self.owner, 0)?;
        self.region = Some(region);
        Ok(())
    }

    fn enqueue(&mut self, item: &[u8]) -> Result<bool> {
        let region = self.region()?;
        let len = item.len();
        if len > self.max_payload_len() {
            return Err(Error::MessageTooLarge {
                len,
                max: self.max_payload_len(),
            });
        }
        let record_len = LENGTH_FIELD_SIZE + len;

        let tail = region.load_cursor(Cursor::Tail, Ordering::Relaxed)?;
        let head = region.load_cursor(Cursor::Head, Ordering::Acquire)?;
        let free = self.queue_size - used_bytes(head, tail, self.queue_size);
        if free < record_len + len {
            return Ok(false);
        }

        let placement = place_record(tail, record_len, self.queue_size);
        let skipped = placement.skipped(tail, self.queue_size);
        // The write must never move the tail onto the head.
        if record_len + skipped >= free {
            if skipped > 0 && skipped < free {
                self.wrap_tail(region, placement.wrap_marker)?;
            }
            return Ok(false);
        }

        if let Some(marker) = placement.wrap_marker {
            region.write_i32(marker, FLAG_WRAPPED)?;
            log::trace!("queue `{}` wrapped at offset {}", self.name, marker);
        }
        region.write_i32(placement.offset, LengthField::Committed(len).encode()?)?;
        region.write_bytes(placement.offset + LENGTH_FIELD_SIZE, item)?;
        region.store_cursor(Cursor::Tail, placement.next_tail, Ordering::Release);
        Ok(true)
    }

    fn dequeue(&mut self, out: &mut Vec<u8>) -> Result<bool> {
        let region = self.region()?;
        let head = region.load_cursor(Cursor::Head, Ordering::Relaxed)?;
        let tail = region.load_cursor(Cursor::Tail, Ordering::Acquire)?;
        if head == tail {
            return Ok(false);
        }

        let mut offset = head;
        let mut field = self.read_length(region, offset)?;
        if field == LengthField::Wrapped {
            log::trace!("queue `{}` reader wrapped at offset {}", self.name, offset);
            offset = 0;
            if offset == tail {
                region.store_cursor(Cursor::Head, offset, Ordering::Release);
                return Ok(false);
            }
            field = self.read_length(region, offset)?;
        }

        let len = match field {
            LengthField::Committed(len) => len,
            LengthField::Wrapped | LengthField::Empty => {
                return Err(Error::Corrupt("unexpected sentinel in stream record"))
            }
        };
        let end = offset + LENGTH_FIELD_SIZE + len;
        if end > self.queue_size {
            return Err(Error::Corrupt("stream record overruns the region"));
        }

        out.clear();
        out.resize(len, 0);
        region.read_bytes(offset + LENGTH_FIELD_SIZE, out.as_mut_slice())?;

        let next = if end >= self.queue_size { 0 } else { end };
        region.store_cursor(Cursor::Head, next, Ordering::Release);
        Ok(true)
    }

    fn head(&self) -> Result<usize> {
        self.region()?.load_cursor(Cursor::Head, Ordering::Acquire)
    }

    fn tail(&self) -> Result<usize> {
        self.region()?.load_cursor(Cursor::Tail, Ordering::Acquire)
    }

    fn dispose(&mut self) -> Result<()> {
        match self.region.take() {
            Some(region) => region.release(),
            None => Ok(()),
        }
    }
}

impl Drop for StreamQueue {
    fn drop(&mut self) {
        release_on_drop(self.region.take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{tempdir, TempDir};

    fn queue(dir: &TempDir, name: &str, queue_size_bytes: usize) -> Result<StreamQueue> {
        StreamQueue::open(
            name,
            true,
            StreamQueueConfig {
                shm: ShmConfig::with_root(dir.path()),
                queue_size_bytes,
            },
        )
    }

    #[test]
    fn conservative_margin_rejects_second_record() -> Result<()> {
        let dir = tempdir()?;
        let mut queue = queue(&dir, "margin", 16)?;
        assert!(queue.enqueue(b"hello")?);
        assert_eq!(queue.tail()?, 9);
        assert!(!queue.enqueue(b"abcd")?);

        let mut out = Vec::new();
        assert!(queue.dequeue(&mut out)?);
        assert_eq!(out, b"hello");
        assert!(!queue.dequeue(&mut out)?);
        Ok(())
    }

    #[test]
    fn record_that_can_never_fit_is_too_large() -> Result<()> {
        let dir = tempdir()?;
        let mut queue = queue(&dir, "large", 16)?;
        assert_eq!(queue.max_payload_len(), 6);
        assert!(matches!(
            queue.enqueue(&[1u8; 7]),
            Err(Error::MessageTooLarge { len: 7, max: 6 })
        ));
        assert!(queue.enqueue(&[1u8; 6])?);
        Ok(())
    }

    #[test]
    fn wrap_marker_is_written_and_followed() -> Result<()> {
        let dir = tempdir()?;
        let mut queue = queue(&dir, "wrap", 32)?;
        let mut out = Vec::new();

        // 3 x 9-byte records leave the tail at 27.
        for msg in [b"aaaaa", b"bbbbb", b"ccccc"] {
            assert!(queue.enqueue(msg)?);
            assert!(queue.dequeue(&mut out)?);
            assert_eq!(out, msg);
        }
        assert_eq!(queue.tail()?, 27);

        assert!(queue.enqueue(b"wrapped")?);
        assert_eq!(queue.tail()?, 11);
        assert_eq!(queue.region()?.read_i32(27)?, FLAG_WRAPPED);

        assert!(queue.dequeue(&mut out)?);
        assert_eq!(out, b"wrapped");
        assert_eq!(queue.head()?, 11);
        Ok(())
    }

    #[test]
    fn reader_skips_tail_fragment_without_marker() -> Result<()> {
        let dir = tempdir()?;
        let mut queue = queue(&dir, "fragment", 32)?;
        let mut out = Vec::new();

        // Two 15-byte records leave two bytes at the end: no room for a marker.
        for msg in [&[1u8; 11], &[2u8; 11]] {
            assert!(queue.enqueue(msg)?);
            assert!(queue.dequeue(&mut out)?);
        }
        assert_eq!(queue.tail()?, 30);

        assert!(queue.enqueue(b"next")?);
        assert_eq!(queue.tail()?, 8);
        assert!(queue.dequeue(&mut out)?);
        assert_eq!(out, b"next");
        Ok(())
    }

    #[test]
    fn record_ending_on_boundary_resets_cursors() -> Result<()> {
        let dir = tempdir()?;
        let mut queue = queue(&dir, "boundary", 24)?;
        let mut out = Vec::new();
        assert!(queue.enqueue(&[7u8; 8])?);
        assert!(queue.dequeue(&mut out)?);
        assert_eq!(queue.head()?, 12);

        assert!(queue.enqueue(&[8u8; 8])?);
        assert_eq!(queue.tail()?, 0);
        assert!(queue.dequeue(&mut out)?);
        assert_eq!(out, [8u8; 8]);
        assert_eq!(queue.head()?, 0);
        Ok(())
    }

    #[test]
    fn mixed_sizes_survive_many_wraps() -> Result<()> {
        let dir = tempdir()?;
        let mut queue = queue(&dir, "mixed", 64)?;
        let mut out = Vec::new();
        let mut pending = std::collections::VecDeque::new();

        for i in 0..500usize {
            let msg = vec![(i % 251) as u8; i % 17];
            if queue.enqueue(&msg)? {
                pending.push_back(msg);
            } else if let Some(expected) = pending.pop_front() {
                assert!(queue.dequeue(&mut out)?);
                assert_eq!(out, expected);
            } else {
                // Only a bare tail wrap is outstanding.
                assert!(!queue.dequeue(&mut out)?);
                assert_eq!(queue.used_bytes()?, 0);
            }
            if i % 3 == 0 {
                if let Some(expected) = pending.pop_front() {
                    assert!(queue.dequeue(&mut out)?);
                    assert_eq!(out, expected);
                }
            }
        }
        while let Some(expected) = pending.pop_front() {
            assert!(queue.dequeue(&mut out)?);
            assert_eq!(out, expected);
        }
        assert!(!queue.dequeue(&mut out)?);
        Ok(())
    }

    #[test]
    fn long_record_on_drained_queue_waits_for_one_reader_poll() -> Result<()> {
        let dir = tempdir()?;
        let mut queue = queue(&dir, "realign", 16)?;
        let mut out = Vec::new();
        assert!(queue.enqueue(b"abcd")?);
        assert!(queue.dequeue(&mut out)?);
        assert_eq!((queue.head()?, queue.tail()?), (8, 8));

        // 9 bytes from 8 would reach the end, and from 0 would reach the head.
        assert!(!queue.enqueue(b"12345")?);
        assert_eq!(queue.tail()?, 0);
        assert_eq!(queue.region()?.read_i32(8)?, FLAG_WRAPPED);

        assert!(!queue.dequeue(&mut out)?);
        assert_eq!(out, b"abcd");
        assert_eq!((queue.head()?, queue.tail()?), (0, 0));

        let mut attempts = 0;
        while !queue.enqueue(b"12345")? {
            attempts += 1;
            assert!(attempts < 3, "payload within max_payload_len refused");
            assert!(!queue.dequeue(&mut out)?);
        }
        assert!(queue.dequeue(&mut out)?);
        assert_eq!(out, b"12345");
        Ok(())
    }

    #[test]
    fn tail_wrap_waits_behind_unread_records() -> Result<()> {
        let dir = tempdir()?;
        let mut queue = queue(&dir, "behind", 32)?;
        let mut out = Vec::new();
        for msg in [&[1u8; 8], &[2u8; 8]] {
            assert!(queue.enqueue(msg)?);
        }
        assert!(queue.dequeue(&mut out)?);
        assert_eq!((queue.head()?, queue.tail()?), (12, 24));

        // A 12-byte record fits neither in the 8 bytes left at the end nor
        // before the head at 12.
        assert!(!queue.enqueue(&[3u8; 8])?);
        assert_eq!(queue.tail()?, 0);
        assert_eq!(queue.used_bytes()?, 20);

        assert!(queue.dequeue(&mut out)?);
        assert_eq!(out, [2u8; 8]);
        assert!(!queue.dequeue(&mut out)?);
        assert_eq!(queue.head()?, 0);

        assert!(queue.enqueue(&[3u8; 8])?);
        assert!(queue.dequeue(&mut out)?);
        assert_eq!(out, [3u8; 8]);
        Ok(())
    }

    #[test]
    fn too_small_region_is_rejected() {
        let res = StreamQueue::new("tiny", true, StreamQueueConfig {
            queue_size_bytes: 4,
            ..StreamQueueConfig::default()
        });
        assert!(matches!(res, Err(Error::InvalidArgument(_))));
    }
}
