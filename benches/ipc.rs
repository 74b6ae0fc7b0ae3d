use criterion::{black_box, BatchSize, BenchmarkId, Criterion, Throughput};
use criterion::{criterion_group, criterion_main};
use tempfile::tempdir;

use ringqueue::ipc::{MpscQueue, MpscQueueConfig, SlotQueue, SlotQueueConfig, StreamQueue, StreamQueueConfig};
use ringqueue::{RingBuffer, ShmConfig};

const ROUND_TRIPS_PER_ITER: usize = 10_000;

fn round_trips<Q>(queue: &mut Q, payload: &[u8], out: &mut Vec<u8>)
where
    Q: RingBuffer<Item = [u8], Output = Vec<u8>>,
{
    for _ in 0..ROUND_TRIPS_PER_ITER {
        assert!(queue.enqueue(black_box(payload)).expect("enqueue"));
        assert!(queue.dequeue(out).expect("dequeue"));
    }
}

fn bench_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("ipc_round_trip");
    group.throughput(Throughput::Elements(ROUND_TRIPS_PER_ITER as u64));
    for &size in &[16_usize, 128, 1024] {
        group.bench_with_input(BenchmarkId::new("slot", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let dir = tempdir().expect("tempdir");
                    let queue = SlotQueue::open(
                        "bench_slot",
                        true,
                        SlotQueueConfig {
                            shm: ShmConfig::with_root(dir.path()),
                            capacity: 1024,
                            max_msg_size: size,
                        },
                    )
                    .expect("slot queue");
                    (dir, queue, vec![7u8; size], Vec::with_capacity(size))
                },
                |(_dir, mut queue, payload, mut out)| round_trips(&mut queue, &payload, &mut out),
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("stream", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let dir = tempdir().expect("tempdir");
                    let queue = StreamQueue::open(
                        "bench_stream",
                        true,
                        StreamQueueConfig {
                            shm: ShmConfig::with_root(dir.path()),
                            queue_size_bytes: 1 << 20,
                        },
                    )
                    .expect("stream queue");
                    (dir, queue, vec![7u8; size], Vec::with_capacity(size))
                },
                |(_dir, mut queue, payload, mut out)| round_trips(&mut queue, &payload, &mut out),
                BatchSize::LargeInput,
            );
        });

        group.bench_with_input(BenchmarkId::new("mpsc", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let dir = tempdir().expect("tempdir");
                    let queue = MpscQueue::open(
                        "bench_mpsc",
                        true,
                        MpscQueueConfig {
                            shm: ShmConfig::with_root(dir.path()),
                            capacity: 1024,
                            max_msg_size: size,
                            max_producers: 4,
                        },
                    )
                    .expect("mpsc queue");
                    (dir, queue, vec![7u8; size], Vec::with_capacity(size))
                },
                |(_dir, mut queue, payload, mut out)| round_trips(&mut queue, &payload, &mut out),
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_round_trip);
criterion_main!(benches);
