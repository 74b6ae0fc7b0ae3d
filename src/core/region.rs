//! Byte-offset accessors over a mapped queue region.
//!
//! ```text
//! [0..4)    i32 head
//! [4..8)    i32 tail
//! [8..8+Q)  data region, addressed with data-relative offsets
//! ```
//!
//! This is the only module that dereferences raw pointers into shared
//! memory. Every access is bounds-checked against the data region, and
//! atomic views are only handed out for 4-byte aligned words.

use std::ptr;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::core::frame::{align_up, LENGTH_FIELD_SIZE};
use crate::core::shm::{ShmConfig, ShmSegment};
use crate::core::{Error, Result};

pub const HEAD_OFFSET: usize = 0;
pub const TAIL_OFFSET: usize = 4;
pub const REGION_HEADER_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Cursor {
    Head,
    Tail,
}

impl Cursor {
    fn offset(self) -> usize {
        match self {
            Cursor::Head => HEAD_OFFSET,
            Cursor::Tail => TAIL_OFFSET,
        }
    }
}

pub(crate) struct Region {
    segment: ShmSegment,
    config: ShmConfig,
    data_len: usize,
    owner: bool,
}

impl Region {
    /// Total mapping size for a data region of `data_len` bytes.
    pub fn total_len(data_len: usize) -> usize {
        align_up(REGION_HEADER_SIZE + data_len, LENGTH_FIELD_SIZE)
    }

    /// Creates the backing object. The caller initializes the contents.
    pub fn create(config: &ShmConfig, name: &str, data_len: usize) -> Result<Self> {
        let segment = ShmSegment::create(config, name, Self::total_len(data_len))?;
        Ok(Self {
            segment,
            config: config.clone(),
            data_len,
            owner: true,
        })
    }

    pub fn open(config: &ShmConfig, name: &str, data_len: usize) -> Result<Self> {
        let segment = ShmSegment::open(config, name, Self::total_len(data_len))?;
        Ok(Self {
            segment,
            config: config.clone(),
            data_len,
            owner: false,
        })
    }

    pub fn name(&self) -> &str {
        self.segment.name()
    }

    fn base(&self) -> *mut u8 {
        self.segment.as_mut_ptr()
    }

    pub fn cursor_word(&self, cursor: Cursor) -> &AtomicI32 {
        // SAFETY: the mapping is at least REGION_HEADER_SIZE bytes, page
        // aligned, and both cursor offsets are multiples of 4.
        unsafe { &*(self.base().add(cursor.offset()) as *const AtomicI32) }
    }

    /// Loads a cursor and checks that it points inside the data region.
    pub fn load_cursor(&self, cursor: Cursor, order: Ordering) -> Result<usize> {
        let raw = self.cursor_word(cursor).load(order);
        self.check_cursor(raw)
    }

    pub fn store_cursor(&self, cursor: Cursor, value: usize, order: Ordering) {
        debug_assert!(value < self.data_len.max(1));
        self.cursor_word(cursor).store(value as i32, order);
    }

    pub fn check_cursor(&self, raw: i32) -> Result<usize> {
        if raw < 0 || raw as usize >= self.data_len {
            return Err(Error::Corrupt("cursor outside data region"));
        }
        Ok(raw as usize)
    }

    fn data_ptr(&self, offset: usize, len: usize) -> Result<*mut u8> {
        let end = offset
            .checked_add(len)
            .ok_or(Error::Corrupt("range overflow"))?;
        if end > self.data_len {
            return Err(Error::Corrupt("range out of bounds"));
        }
        // SAFETY: REGION_HEADER_SIZE + end <= total_len(data_len) <= mapped length.
        Ok(unsafe { self.base().add(REGION_HEADER_SIZE + offset) })
    }

    /// Atomic view of the aligned length word at `offset`.
    pub fn word(&self, offset: usize) -> Result<&AtomicI32> {
        if offset % LENGTH_FIELD_SIZE != 0 {
            return Err(Error::Corrupt("misaligned length field"));
        }
        let ptr = self.data_ptr(offset, LENGTH_FIELD_SIZE)?;
        // SAFETY: in bounds, and 4-aligned because the mapping base is page
        // aligned and REGION_HEADER_SIZE and offset are multiples of 4.
        Ok(unsafe { &*(ptr as *const AtomicI32) })
    }

    /// Plain, possibly unaligned read. Visibility comes from the cursor
    /// acquire/release pair that guards the record.
    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        let ptr = self.data_ptr(offset, LENGTH_FIELD_SIZE)?;
        // SAFETY: bounds checked above; read_unaligned has no alignment requirement.
        Ok(unsafe { ptr::read_unaligned(ptr as *const i32) })
    }

    pub fn write_i32(&self, offset: usize, value: i32) -> Result<()> {
        let ptr = self.data_ptr(offset, LENGTH_FIELD_SIZE)?;
        // SAFETY: bounds checked above; write_unaligned has no alignment requirement.
        unsafe { ptr::write_unaligned(ptr as *mut i32, value) };
        Ok(())
    }

    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> Result<()> {
        if src.is_empty() {
            return Ok(());
        }
        let dst = self.data_ptr(offset, src.len())?;
        // SAFETY: destination is in bounds and cannot overlap a caller slice.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst, src.len()) };
        Ok(())
    }

    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> Result<()> {
        if dst.is_empty() {
            return Ok(());
        }
        let src = self.data_ptr(offset, dst.len())?;
        // SAFETY: source is in bounds and cannot overlap a caller slice.
        unsafe { ptr::copy_nonoverlapping(src as *const u8, dst.as_mut_ptr(), dst.len()) };
        Ok(())
    }

    /// Stores `value` into every aligned word of the data region.
    pub fn fill_words(&self, value: i32) -> Result<()> {
        let words = self.data_len / LENGTH_FIELD_SIZE;
        for index in 0..words {
            self.word(index * LENGTH_FIELD_SIZE)?
                .store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Unmaps the region; the owner also removes the backing object.
    pub fn release(self) -> Result<()> {
        let Region {
            segment,
            config,
            owner,
            ..
        } = self;
        let name = segment.name().to_string();
        drop(segment);
        if owner {
            ShmSegment::remove(&config, &name)?;
            log::info!("owner released queue `{}` and removed its backing object", name);
        } else {
            log::debug!("released queue `{}` (not owner)", name);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn owner_region(data_len: usize) -> Result<(tempfile::TempDir, Region)> {
        let dir = tempdir()?;
        let config = ShmConfig::with_root(dir.path());
        let region = Region::create(&config, "region", data_len)?;
        Ok((dir, region))
    }

    #[test]
    fn total_len_includes_header_and_alignment() {
        assert_eq!(Region::total_len(16), 24);
        assert_eq!(Region::total_len(17), 28);
    }

    #[test]
    fn word_rejects_misaligned_and_out_of_bounds() -> Result<()> {
        let (_dir, region) = owner_region(16)?;
        assert!(region.word(0).is_ok());
        assert!(region.word(12).is_ok());
        assert!(matches!(region.word(2), Err(Error::Corrupt(_))));
        assert!(matches!(region.word(16), Err(Error::Corrupt(_))));
        Ok(())
    }

    #[test]
    fn unaligned_i32_round_trips() -> Result<()> {
        let (_dir, region) = owner_region(16)?;
        region.write_i32(5, -1)?;
        assert_eq!(region.read_i32(5)?, -1);
        assert!(region.read_i32(13).is_err());
        Ok(())
    }

    #[test]
    fn bytes_are_visible_through_a_second_mapping() -> Result<()> {
        let dir = tempdir()?;
        let config = ShmConfig::with_root(dir.path());
        let owner = Region::create(&config, "pair", 32)?;
        let peer = Region::open(&config, "pair", 32)?;

        owner.write_bytes(4, b"hello")?;
        owner.store_cursor(Cursor::Tail, 12, Ordering::Release);

        let mut buf = [0u8; 5];
        peer.read_bytes(4, &mut buf)?;
        assert_eq!(&buf, b"hello");
        assert_eq!(peer.load_cursor(Cursor::Tail, Ordering::Acquire)?, 12);
        Ok(())
    }

    #[test]
    fn corrupt_cursor_is_reported() -> Result<()> {
        let (_dir, region) = owner_region(16)?;
        region.cursor_word(Cursor::Head).store(16, Ordering::Relaxed);
        assert!(matches!(
            region.load_cursor(Cursor::Head, Ordering::Relaxed),
            Err(Error::Corrupt(_))
        ));
        region.cursor_word(Cursor::Head).store(-4, Ordering::Relaxed);
        assert!(region.load_cursor(Cursor::Head, Ordering::Relaxed).is_err());
        Ok(())
    }

    #[test]
    fn fill_words_writes_every_word() -> Result<()> {
        let (_dir, region) = owner_region(12)?;
        region.fill_words(-2)?;
        for offset in [0, 4, 8] {
            assert_eq!(region.word(offset)?.load(Ordering::Relaxed), -2);
        }
        Ok(())
    }

    #[test]
    fn owner_release_removes_backing_object() -> Result<()> {
        let dir = tempdir()?;
        let config = ShmConfig::with_root(dir.path());
        let owner = Region::create(&config, "owned", 8)?;
        let peer = Region::open(&config, "owned", 8)?;
        peer.release()?;
        assert!(dir.path().join("owned").exists());
        owner.release()?;
        assert!(!dir.path().join("owned").exists());
        Ok(())
    }
}
