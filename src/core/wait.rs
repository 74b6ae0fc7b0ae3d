//! Caller-side retry loops.
//!
//! Queues never block: a full enqueue or an empty dequeue returns `false`
//! immediately. [`Poller`] wraps such a call in a retry loop that stops on
//! success, on cancellation or at a deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::ring::RingBuffer;
use crate::core::Result;

const DEFAULT_SPINS: u32 = 128;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStrategy {
    /// True busy-spinning. Burns a whole core for the lowest latency.
    BusySpin,
    /// Gives the time slice back to the OS between attempts.
    Yield,
    /// Spins for `spins` attempts, then yields.
    SpinThenYield { spins: u32 },
    /// Low-priority polling with a fixed sleep between attempts.
    Sleep(Duration),
}

impl Default for WaitStrategy {
    fn default() -> Self {
        Self::SpinThenYield {
            spins: DEFAULT_SPINS,
        }
    }
}

impl WaitStrategy {
    fn snooze(&self, attempt: u32) {
        match *self {
            WaitStrategy::BusySpin => std::hint::spin_loop(),
            WaitStrategy::Yield => std::thread::yield_now(),
            WaitStrategy::SpinThenYield { spins } => {
                if attempt < spins {
                    std::hint::spin_loop();
                } else {
                    std::thread::yield_now();
                }
            }
            WaitStrategy::Sleep(duration) => std::thread::sleep(duration),
        }
    }
}

/// Shared stop flag for polling loops running on other threads.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

#[derive(Clone, Debug, Default)]
pub struct Poller {
    strategy: WaitStrategy,
    token: Option<CancellationToken>,
    deadline: Option<Instant>,
}

impl Poller {
    pub fn new(strategy: WaitStrategy) -> Self {
        Self {
            strategy,
            ..Self::default()
        }
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self
    }

    fn should_stop(&self) -> bool {
        if self.token.as_ref().is_some_and(CancellationToken::is_cancelled) {
            return true;
        }
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Calls `attempt` until it returns `true`. Returns `false` if the token
    /// was cancelled or the deadline passed first. Errors end the loop.
    pub fn run<F>(&self, mut attempt: F) -> Result<bool>
    where
        F: FnMut() -> Result<bool>,
    {
        let mut tries: u32 = 0;
        loop {
            if attempt()? {
                return Ok(true);
            }
            if self.should_stop() {
                return Ok(false);
            }
            self.strategy.snooze(tries);
            tries = tries.saturating_add(1);
        }
    }
}

/// Retries `enqueue` until it succeeds or `poller` gives up.
pub fn enqueue_blocking<Q>(queue: &mut Q, item: &Q::Item, poller: &Poller) -> Result<bool>
where
    Q: RingBuffer + ?Sized,
{
    poller.run(|| queue.enqueue(item))
}

/// Retries `dequeue` until a message arrives or `poller` gives up.
pub fn dequeue_blocking<Q>(queue: &mut Q, out: &mut Q::Output, poller: &Poller) -> Result<bool>
where
    Q: RingBuffer + ?Sized,
{
    poller.run(|| queue.dequeue(out))
}
