//! Queues whose producer and consumer are threads of one process.

pub mod spsc;

pub use spsc::{Consumer, Producer, SpscQueue};
