//! Chunk stream group throughput benchmark.
//!
//! Usage:
//!     cargo run --release --bin group_bench
//!
//! Environment variables:
//!     STREAM_CPUS=0,2,4,6  Pin stream workers and readers round-robin
//!                          (default: unpinned)
//!     CONSUMER_CPU=1       Pin the consumer (default: unpinned)
//!     EVICTION=lossless    Eviction mode (default: lossy)

use std::env;
use std::sync::Arc;
use std::thread;

use minstant::Instant;

use braid::recv::{
    Chunk, ChunkRing, ChunkStreamConfig, ChunkStreamGroupConfig, ChunkStreamRingGroup, EvictionMode,
    HEAP_LENGTH_ID, Heap, InprocQueue, Item, LinearPlacement, StreamConfig,
};
use braid::runtime::{CpuConfig, Executor, ThreadExecutor, executor::pin_to_core};

const STREAMS: usize = 4;
const HEAPS_PER_CHUNK: usize = 64;
const HEAP_SIZE: usize = 8192;
const CHUNKS: usize = 4096;
const MAX_CHUNKS: usize = 4;
const RING_CHUNKS: usize = 8;
const POSITION_ID: u64 = 0x1000;

fn stream_cpus() -> CpuConfig {
    env::var("STREAM_CPUS")
        .ok()
        .map(|s| s.split(',').filter_map(|c| c.trim().parse().ok()).collect::<Vec<usize>>())
        .filter(|cores| !cores.is_empty())
        .map_or(CpuConfig::Disabled, CpuConfig::Manual)
}

fn consumer_cpu() -> Option<usize> {
    env::var("CONSUMER_CPU").ok().and_then(|s| s.parse().ok())
}

fn eviction_mode() -> EvictionMode {
    match env::var("EVICTION").as_deref() {
        Ok("lossless") => EvictionMode::Lossless,
        _ => EvictionMode::Lossy,
    }
}

fn bench_group(mode: EvictionMode) {
    let data = Arc::new(ChunkRing::new(RING_CHUNKS).unwrap());
    let free = Arc::new(ChunkRing::new(RING_CHUNKS).unwrap());
    for _ in 0..RING_CHUNKS {
        free.put(Box::new(Chunk::new(HEAPS_PER_CHUNK, HEAPS_PER_CHUNK * HEAP_SIZE)))
            .unwrap();
    }

    let config = ChunkStreamGroupConfig::new(MAX_CHUNKS, mode).unwrap();
    let mut group = ChunkStreamRingGroup::new(config, Arc::clone(&data), free);
    let executor: Arc<dyn Executor> = Arc::new(ThreadExecutor::new(&stream_cpus()));

    let mut queues = Vec::with_capacity(STREAMS);
    for _ in 0..STREAMS {
        let chunk_config = ChunkStreamConfig::new(LinearPlacement::new(HEAPS_PER_CHUNK, HEAP_SIZE))
            .with_items([POSITION_ID, HEAP_LENGTH_ID])
            .with_max_chunks(MAX_CHUNKS)
            .unwrap();
        let member = group
            .add_stream(Arc::clone(&executor), StreamConfig::new(64).unwrap(), chunk_config)
            .unwrap();
        let queue = InprocQueue::new();
        member.add_reader(queue.reader()).unwrap();
        queues.push(queue);
    }

    let total_heaps = CHUNKS * HEAPS_PER_CHUNK;
    let sender = thread::spawn(move || {
        let payload = vec![0xa5u8; HEAP_SIZE];
        for position in 0..total_heaps {
            let heap = Heap::new(
                position as u64,
                vec![Item::new(POSITION_ID, position as u64)],
                payload.clone(),
            );
            queues[position % STREAMS].add_heap(heap).unwrap();
        }
        for queue in &queues {
            queue.stop();
        }
    });

    if let Some(cpu) = consumer_cpu() {
        pin_to_core(cpu);
    }

    let start = Instant::now();
    let mut chunks = 0usize;
    let mut complete = 0usize;
    let mut last_id = -1i64;
    for chunk in data.iter() {
        assert!(chunk.chunk_id() > last_id, "chunk ids must increase");
        last_id = chunk.chunk_id();
        chunks += 1;
        if chunk.is_complete() {
            complete += 1;
        }
        group.add_free_chunk(chunk);
    }
    let elapsed = start.elapsed();
    sender.join().unwrap();
    group.stop();

    let bytes = chunks * HEAPS_PER_CHUNK * HEAP_SIZE;
    let gbps = bytes as f64 * 8.0 / elapsed.as_secs_f64() / 1e9;
    println!(
        "{mode}: {chunks} chunks ({complete} complete) in {:.3}s, {gbps:.2} Gb/s, {:?}",
        elapsed.as_secs_f64(),
        group.stats()
    );
    for member in group.streams() {
        println!("  stream {}: {:?}", member.index(), member.stats());
    }
}

fn main() {
    braid::init_tracing();
    println!("=== Chunk Stream Group Benchmark ===");
    println!(
        "{STREAMS} streams, {HEAPS_PER_CHUNK} heaps/chunk, {HEAP_SIZE} B/heap, {CHUNKS} chunks"
    );
    bench_group(eviction_mode());
}
