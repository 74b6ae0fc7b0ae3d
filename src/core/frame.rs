//! On-wire framing shared by the interprocess queues.
//!
//! Every record starts with a native-endian `i32` length field. Besides real
//! payload lengths the field carries two sentinels:
//!
//! ```text
//! length >= 0  committed record of `length` payload bytes
//! length == -1 FLAG_WRAPPED: nothing fits here, continue at offset 0
//! length == -2 FLAG_MSG_UNCOMMITTED: slot reserved or already consumed
//! ```
//!
//! The raw value is decoded into [`LengthField`] right after it is loaded so
//! the queue logic never compares raw integers.

use crate::core::{Error, Result};

pub const LENGTH_FIELD_SIZE: usize = std::mem::size_of::<i32>();
pub const FLAG_WRAPPED: i32 = -1;
pub const FLAG_MSG_UNCOMMITTED: i32 = -2;

/// Largest byte count a 32-bit cursor or length field can describe.
pub const MAX_WIRE_LEN: usize = i32::MAX as usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LengthField {
    /// Reserved but not yet committed, or consumed and reset.
    Empty,
    /// Wrap marker: the next record lives at offset 0.
    Wrapped,
    /// Committed record with this many payload bytes.
    Committed(usize),
}

impl LengthField {
    pub fn decode(raw: i32) -> Result<Self> {
        match raw {
            FLAG_WRAPPED => Ok(Self::Wrapped),
            FLAG_MSG_UNCOMMITTED => Ok(Self::Empty),
            len if len >= 0 => Ok(Self::Committed(len as usize)),
            _ => Err(Error::Corrupt("unknown length sentinel")),
        }
    }

    pub fn encode(self) -> Result<i32> {
        match self {
            Self::Empty => Ok(FLAG_MSG_UNCOMMITTED),
            Self::Wrapped => Ok(FLAG_WRAPPED),
            Self::Committed(len) => {
                i32::try_from(len).map_err(|_| Error::InvalidArgument("length exceeds i32"))
            }
        }
    }
}

/// Where a record of a given size goes, given the current tail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Placement {
    /// Data-relative offset of the record's length field.
    pub offset: usize,
    /// Tail value to publish once the record is written.
    pub next_tail: usize,
    /// Offset that must receive `FLAG_WRAPPED`, if the record wrapped and
    /// the leftover space can hold a length field.
    pub wrap_marker: Option<usize>,
}

impl Placement {
    /// Bytes left unused at the end of the region when the record wrapped.
    pub fn skipped(&self, tail: usize, queue_size: usize) -> usize {
        if self.offset == tail {
            0
        } else {
            queue_size - tail
        }
    }
}

#[inline]
pub fn align_up(value: usize, align: usize) -> usize {
    if align == 0 {
        return value;
    }
    (value + align - 1) & !(align - 1)
}

/// Bytes between `head` and `tail` in a circular region of `queue_size` bytes.
#[inline]
pub fn used_bytes(head: usize, tail: usize, queue_size: usize) -> usize {
    if tail >= head {
        tail - head
    } else {
        queue_size - (head - tail)
    }
}

/// Places a record of `record_len` bytes at `tail`, wrapping to offset 0 if
/// it would overrun the region. A tail that lands exactly on `queue_size`
/// wraps to 0.
pub fn place_record(tail: usize, record_len: usize, queue_size: usize) -> Placement {
    let (offset, wrap_marker) = if tail + record_len > queue_size {
        let marker = (queue_size - tail >= LENGTH_FIELD_SIZE).then_some(tail);
        (0, marker)
    } else {
        (tail, None)
    };
    let mut next_tail = offset + record_len;
    if next_tail >= queue_size {
        next_tail = 0;
    }
    Placement {
        offset,
        next_tail,
        wrap_marker,
    }
}
