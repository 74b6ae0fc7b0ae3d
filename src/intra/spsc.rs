//! Lock-free single-producer single-consumer ring for threads.
//!
//! Lamport queue over `capacity + 1` cells: `tail == head` means empty and
//! `next(tail) == head` means full, so one cell always stays unused.
//!
//! Each side loads its own cursor relaxed (only it writes that cursor) and
//! the other side's cursor with acquire. The cell is written or moved out
//! strictly before the release store that publishes the new cursor.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::core::{Error, Result, RingBuffer};

/// Keeps the two cursors on separate cache lines.
#[repr(C, align(64))]
struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    const fn new(value: T) -> Self {
        Self { value }
    }
}

struct Ring<T> {
    /// Next cell to read. Written by the consumer only.
    head: CachePadded<AtomicUsize>,
    /// Next cell to write. Written by the producer only.
    tail: CachePadded<AtomicUsize>,
    cells: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// SAFETY: cells are only touched by the side that owns the cursor guarding
// them, and the acquire/release cursor pair orders every hand-off.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidArgument("capacity must be non-zero"));
        }
        let cell_count = capacity
            .checked_add(1)
            .ok_or(Error::InvalidArgument("capacity overflows"))?;
        let cells = (0..cell_count)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Ok(Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            cells,
        })
    }

    #[inline]
    fn next(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.cells.len() {
            0
        } else {
            next
        }
    }

    /// Returns the cell to write, or `None` when full.
    ///
    /// # Safety
    ///
    /// Must only be called from the single producer.
    #[inline]
    unsafe fn writable(&self) -> Option<usize> {
        let tail = self.tail.value.load(Ordering::Relaxed);
        if self.next(tail) == self.head.value.load(Ordering::Acquire) {
            return None;
        }
        Some(tail)
    }

    /// # Safety
    ///
    /// Single producer only, with `tail` freshly returned by `writable`.
    #[inline]
    unsafe fn publish(&self, tail: usize, value: T) {
        (*self.cells[tail].get()).write(value);
        self.tail.value.store(self.next(tail), Ordering::Release);
    }

    /// # Safety
    ///
    /// Must only be called from the single producer.
    #[inline]
    unsafe fn push(&self, value: T) -> std::result::Result<(), T> {
        match self.writable() {
            Some(tail) => {
                self.publish(tail, value);
                Ok(())
            }
            None => Err(value),
        }
    }

    /// # Safety
    ///
    /// Must only be called from the single consumer.
    #[inline]
    unsafe fn pop(&self) -> Option<T> {
        let head = self.head.value.load(Ordering::Relaxed);
        if head == self.tail.value.load(Ordering::Acquire) {
            return None;
        }
        let value = (*self.cells[head].get()).assume_init_read();
        self.head.value.store(self.next(head), Ordering::Release);
        Some(value)
    }

    fn size_approx(&self) -> usize {
        let tail = self.tail.value.load(Ordering::Acquire);
        let head = self.head.value.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            self.cells.len() + tail - head
        }
    }

    fn capacity(&self) -> usize {
        self.cells.len() - 1
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let mut head = *self.head.value.get_mut();
        let tail = *self.tail.value.get_mut();
        while head != tail {
            // SAFETY: cells in [head, tail) hold initialized values and
            // nothing else can observe them during drop.
            unsafe { self.cells[head].get_mut().assume_init_drop() };
            head = self.next(head);
        }
    }
}

/// Typed SPSC queue owned by one thread, or split into two handles.
pub struct SpscQueue<T> {
    ring: Ring<T>,
}

impl<T> SpscQueue<T> {
    /// Creates a queue that holds up to `capacity` items.
    pub fn new(capacity: usize) -> Result<Self> {
        Ok(Self {
            ring: Ring::new(capacity)?,
        })
    }

    /// Hands `value` back when the queue is full.
    pub fn push(&mut self, value: T) -> std::result::Result<(), T> {
        // SAFETY: `&mut self` makes this the only producer.
        unsafe { self.ring.push(value) }
    }

    pub fn pop(&mut self) -> Option<T> {
        // SAFETY: `&mut self` makes this the only consumer.
        unsafe { self.ring.pop() }
    }

    pub fn size_approx(&self) -> usize {
        self.ring.size_approx()
    }

    pub fn is_empty(&self) -> bool {
        self.size_approx() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Splits the queue into a producer and a consumer that can live on
    /// different threads.
    pub fn split(self) -> (Producer<T>, Consumer<T>) {
        let ring = Arc::new(self.ring);
        (
            Producer {
                ring: Arc::clone(&ring),
            },
            Consumer { ring },
        )
    }
}

impl<T: Clone> RingBuffer for SpscQueue<T> {
    type Item = T;
    type Output = T;

    fn enqueue(&mut self, item: &T) -> Result<bool> {
        // SAFETY: `&mut self` makes this the only producer.
        unsafe {
            match self.ring.writable() {
                Some(tail) => {
                    self.ring.publish(tail, item.clone());
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    fn dequeue(&mut self, out: &mut T) -> Result<bool> {
        match self.pop() {
            Some(value) => {
                *out = value;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn head(&self) -> Result<usize> {
        Ok(self.ring.head.value.load(Ordering::Acquire))
    }

    fn tail(&self) -> Result<usize> {
        Ok(self.ring.tail.value.load(Ordering::Acquire))
    }
}

/// Write end of a split [`SpscQueue`].
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Producer<T> {
    pub fn push(&mut self, value: T) -> std::result::Result<(), T> {
        // SAFETY: Producer is not Clone, so there is exactly one.
        unsafe { self.ring.push(value) }
    }

    pub fn size_approx(&self) -> usize {
        self.ring.size_approx()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}

/// Read end of a split [`SpscQueue`].
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Consumer<T> {
    pub fn pop(&mut self) -> Option<T> {
        // SAFETY: Consumer is not Clone, so there is exactly one.
        unsafe { self.ring.pop() }
    }

    pub fn size_approx(&self) -> usize {
        self.ring.size_approx()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}
