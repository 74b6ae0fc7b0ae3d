//! Building blocks shared by every queue: errors, the queue contract, the
//! wire framing, and the shared-memory plumbing underneath it.

pub mod error;
pub mod frame;
pub(crate) mod region;
pub mod ring;
pub mod shm;
pub mod wait;

pub use error::{Error, Result};
pub use frame::{LengthField, FLAG_MSG_UNCOMMITTED, FLAG_WRAPPED};
pub use ring::{drain, RingBuffer};
pub use shm::ShmConfig;
pub use wait::{dequeue_blocking, enqueue_blocking, CancellationToken, Poller, WaitStrategy};
