//! Fixed-slot framing shared by [`SlotQueue`](super::SlotQueue) and
//! [`MpscQueue`](super::MpscQueue).
//!
//! ```text
//! slot = [i32 length-or-flag][slot_size - 4 bytes of payload area]
//! ```
//!
//! The length field is the commit flag. A slot reads `FLAG_MSG_UNCOMMITTED`
//! until its producer stores the real length with release ordering, and the
//! consumer puts the flag back once it has copied the payload out. Cursors
//! are data-relative byte offsets and always multiples of `slot_size`.

use std::sync::atomic::Ordering;

use crate::core::frame::{
    align_up, place_record, used_bytes, LengthField, Placement, FLAG_MSG_UNCOMMITTED,
    FLAG_WRAPPED, LENGTH_FIELD_SIZE, MAX_WIRE_LEN,
};
use crate::core::region::{Cursor, Region};
use crate::core::{Error, Result};

/// Immutable sizing of a fixed-slot queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SlotLayout {
    pub max_msg_size: usize,
    pub slot_size: usize,
    pub queue_size: usize,
}

impl SlotLayout {
    /// Lays out `slot_count` slots able to carry `max_msg_size` bytes each.
    pub fn new(max_msg_size: usize, slot_count: usize) -> Result<Self> {
        let slot_size = max_msg_size
            .checked_add(LENGTH_FIELD_SIZE)
            .filter(|&n| n <= MAX_WIRE_LEN)
            .map(|n| align_up(n, LENGTH_FIELD_SIZE))
            .ok_or(Error::InvalidArgument("max message size overflows"))?;
        let queue_size = slot_count
            .checked_mul(slot_size)
            .filter(|&q| q <= MAX_WIRE_LEN)
            .ok_or(Error::InvalidArgument("queue size exceeds 32-bit cursor range"))?;
        Ok(Self {
            max_msg_size,
            slot_size,
            queue_size,
        })
    }

    pub fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_msg_size {
            return Err(Error::MessageTooLarge {
                len,
                max: self.max_msg_size,
            });
        }
        Ok(())
    }
}

/// A mapped region speaking the fixed-slot protocol.
pub(crate) struct SlotRing {
    region: Region,
    layout: SlotLayout,
}

impl SlotRing {
    pub fn new(region: Region, layout: SlotLayout) -> Self {
        Self { region, layout }
    }

    #[cfg(test)]
    pub fn region(&self) -> &Region {
        &self.region
    }

    pub fn into_region(self) -> Region {
        self.region
    }

    fn slot_cursor(&self, raw: usize) -> Result<usize> {
        if raw % self.layout.slot_size != 0 {
            return Err(Error::Corrupt("cursor not on a slot boundary"));
        }
        Ok(raw)
    }

    pub fn head(&self) -> Result<usize> {
        let head = self.region.load_cursor(Cursor::Head, Ordering::Acquire)?;
        self.slot_cursor(head)
    }

    pub fn tail(&self) -> Result<usize> {
        let tail = self.region.load_cursor(Cursor::Tail, Ordering::Acquire)?;
        self.slot_cursor(tail)
    }

    pub fn used_bytes(&self) -> Result<usize> {
        Ok(used_bytes(self.head()?, self.tail()?, self.layout.queue_size))
    }

    /// Single-producer enqueue: write, commit, then publish the tail.
    pub fn push(&self, payload: &[u8]) -> Result<bool> {
        self.layout.check_len(payload.len())?;
        let tail = self.slot_cursor(self.region.load_cursor(Cursor::Tail, Ordering::Relaxed)?)?;
        let head = self.slot_cursor(self.region.load_cursor(Cursor::Head, Ordering::Acquire)?)?;

        let free = self.layout.queue_size - used_bytes(head, tail, self.layout.queue_size);
        if free < 2 * self.layout.slot_size {
            return Ok(false);
        }

        let placement = place_record(tail, self.layout.slot_size, self.layout.queue_size);
        self.commit(placement, payload)?;
        self.region
            .store_cursor(Cursor::Tail, placement.next_tail, Ordering::Release);
        Ok(true)
    }

    /// Claims the slot at the shared tail with a CAS loop.
    ///
    /// Returns `None` when fewer than `max_producers + 1` slots are free.
    /// Once this returns a placement the slot belongs to the caller until it
    /// is committed.
    pub fn reserve(&self, max_producers: usize) -> Result<Option<Placement>> {
        let margin = self.layout.slot_size * (max_producers + 1);
        let tail_word = self.region.cursor_word(Cursor::Tail);
        loop {
            let head = self.slot_cursor(self.region.load_cursor(Cursor::Head, Ordering::Acquire)?)?;
            let observed = tail_word.load(Ordering::Acquire);
            let tail = self.slot_cursor(self.region.check_cursor(observed)?)?;

            let free = self.layout.queue_size - used_bytes(head, tail, self.layout.queue_size);
            if free < margin {
                return Ok(None);
            }

            let placement = place_record(tail, self.layout.slot_size, self.layout.queue_size);
            let next = i32::try_from(placement.next_tail)
                .map_err(|_| Error::Corrupt("tail exceeds 32-bit range"))?;
            if tail_word
                .compare_exchange_weak(observed, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return Ok(Some(placement));
            }
            std::hint::spin_loop();
        }
    }

    /// Writes the payload into a claimed slot, then stores its length with
    /// release ordering.
    pub fn commit(&self, placement: Placement, payload: &[u8]) -> Result<()> {
        self.layout.check_len(payload.len())?;
        if let Some(marker) = placement.wrap_marker {
            self.region.word(marker)?.store(FLAG_WRAPPED, Ordering::Release);
            log::trace!("queue `{}` wrapped at offset {}", self.region.name(), marker);
        }
        self.region
            .write_bytes(placement.offset + LENGTH_FIELD_SIZE, payload)?;
        let len = LengthField::Committed(payload.len()).encode()?;
        self.region
            .word(placement.offset)?
            .store(len, Ordering::Release);
        Ok(())
    }

    /// Copies the committed slot at `head` into `out`.
    ///
    /// Reports empty while that slot is uncommitted, even if later slots are
    /// already committed.
    pub fn pop(&self, out: &mut Vec<u8>) -> Result<bool> {
        let head = self.slot_cursor(self.region.load_cursor(Cursor::Head, Ordering::Relaxed)?)?;
        let tail = self.slot_cursor(self.region.load_cursor(Cursor::Tail, Ordering::Acquire)?)?;
        if head == tail {
            return Ok(false);
        }

        let mut offset = head;
        let mut field = self.load_length(offset)?;
        if field == LengthField::Wrapped {
            log::trace!("queue `{}` reader wrapped at offset {}", self.region.name(), offset);
            offset = 0;
            self.region.store_cursor(Cursor::Head, offset, Ordering::Release);
            if offset == tail {
                return Ok(false);
            }
            field = self.load_length(offset)?;
        }

        let len = match field {
            LengthField::Empty => return Ok(false),
            LengthField::Wrapped => return Err(Error::Corrupt("wrap marker at offset 0")),
            LengthField::Committed(len) if len > self.layout.max_msg_size => {
                return Err(Error::Corrupt("slot length exceeds max message size"))
            }
            LengthField::Committed(len) => len,
        };

        out.clear();
        out.resize(len, 0);
        self.region
            .read_bytes(offset + LENGTH_FIELD_SIZE, out.as_mut_slice())?;
        self.region
            .word(offset)?
            .store(FLAG_MSG_UNCOMMITTED, Ordering::Relaxed);

        let mut next = offset + self.layout.slot_size;
        if next >= self.layout.queue_size {
            next = 0;
        }
        self.region.store_cursor(Cursor::Head, next, Ordering::Release);
        Ok(true)
    }

    fn load_length(&self, offset: usize) -> Result<LengthField> {
        LengthField::decode(self.region.word(offset)?.load(Ordering::Acquire))
    }
}
