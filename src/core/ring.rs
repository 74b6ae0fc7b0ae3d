//! The contract shared by every queue variant.
//!
//! Callers written against [`RingBuffer`] work unchanged with the typed
//! intraprocess ring and the three shared-memory queues.

use crate::core::Result;

pub trait RingBuffer {
    /// What `enqueue` borrows: `T` for the typed ring, `[u8]` for byte queues.
    type Item: ?Sized;
    /// Where `dequeue` writes: `T` for the typed ring, `Vec<u8>` for byte queues.
    type Output;

    /// Maps or creates the backing storage. Calling it again is a no-op.
    fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Returns `Ok(false)` when the queue is full. `item` is left untouched
    /// either way, so a failed call can be retried with the same value.
    fn enqueue(&mut self, item: &Self::Item) -> Result<bool>;

    /// Returns `Ok(false)` when nothing is ready; `out` is only written on
    /// success.
    fn dequeue(&mut self, out: &mut Self::Output) -> Result<bool>;

    /// Diagnostic read position.
    fn head(&self) -> Result<usize>;

    /// Diagnostic write position.
    fn tail(&self) -> Result<usize>;

    /// Releases the backing storage. Calling it again is a no-op.
    fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Dequeues until the queue reports empty, handing each message to `f`.
pub fn drain<Q, F>(queue: &mut Q, out: &mut Q::Output, mut f: F) -> Result<usize>
where
    Q: RingBuffer + ?Sized,
    F: FnMut(&Q::Output),
{
    let mut count = 0;
    while queue.dequeue(out)? {
        f(out);
        count += 1;
    }
    Ok(count)
}
