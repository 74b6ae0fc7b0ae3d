//! Producer and consumer in separate processes.
//!
//! The parent re-runs this test binary filtered to `child_producer`, with the
//! shared-memory root passed through the environment.

use std::env;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

use ringqueue::ipc::{SlotQueue, SlotQueueConfig, StreamQueue, StreamQueueConfig};
use ringqueue::{dequeue_blocking, enqueue_blocking, Poller, RingBuffer, ShmConfig, WaitStrategy};
use tempfile::tempdir;

const ROOT_ENV: &str = "RINGQUEUE_CHILD_ROOT";
const COUNT: u32 = 5_000;

fn slot_config(root: &Path) -> SlotQueueConfig {
    SlotQueueConfig {
        shm: ShmConfig::with_root(root),
        capacity: 32,
        max_msg_size: 16,
    }
}

fn stream_config(root: &Path) -> StreamQueueConfig {
    StreamQueueConfig {
        shm: ShmConfig::with_root(root),
        queue_size_bytes: 256,
    }
}

fn message(i: u32) -> Vec<u8> {
    let mut msg = i.to_le_bytes().to_vec();
    msg.extend(std::iter::repeat(i as u8).take((i % 9) as usize));
    msg
}

#[test]
fn child_producer() {
    let Ok(root) = env::var(ROOT_ENV) else {
        return;
    };
    let root = Path::new(&root);
    let poller = Poller::new(WaitStrategy::Yield).with_timeout(Duration::from_secs(60));

    let mut slots = SlotQueue::open("slots", false, slot_config(root)).expect("open slot queue");
    let mut stream = StreamQueue::open("stream", false, stream_config(root)).expect("open stream queue");
    for i in 0..COUNT {
        let msg = message(i);
        assert!(enqueue_blocking(&mut slots, msg.as_slice(), &poller).expect("slot enqueue"));
        assert!(enqueue_blocking(&mut stream, msg.as_slice(), &poller).expect("stream enqueue"));
    }
}

#[test]
fn messages_cross_the_process_boundary() {
    let _ = env_logger::builder().is_test(true).try_init();
    if env::var_os(ROOT_ENV).is_some() {
        return;
    }
    let dir = tempdir().expect("tempdir");
    let mut slots = SlotQueue::open("slots", true, slot_config(dir.path())).expect("owner slots");
    let mut stream = StreamQueue::open("stream", true, stream_config(dir.path())).expect("owner stream");

    let mut child = Command::new(env::current_exe().expect("test binary"))
        .args(["child_producer", "--exact", "--test-threads=1", "--nocapture"])
        .env(ROOT_ENV, dir.path())
        .spawn()
        .expect("spawn child");

    let poller = Poller::new(WaitStrategy::default()).with_timeout(Duration::from_secs(60));
    let mut out = Vec::new();
    for i in 0..COUNT {
        let expected = message(i);
        assert!(dequeue_blocking(&mut slots, &mut out, &poller).expect("slot dequeue"));
        assert_eq!(out, expected);
        assert!(dequeue_blocking(&mut stream, &mut out, &poller).expect("stream dequeue"));
        assert_eq!(out, expected);
    }

    let status = child.wait().expect("wait child");
    assert!(status.success(), "child exited with {status}");
    assert!(!slots.dequeue(&mut out).expect("slots drained"));
    assert!(!stream.dequeue(&mut out).expect("stream drained"));
}
