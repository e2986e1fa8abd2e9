//! Group member streams: one assembler per substream.
//!
//! Responsibilities:
//! - Buffer decoded heaps from the stream's readers (bounded, `max_heaps`).
//! - Run the placement callback and drop rejected or too-old heaps.
//! - Keep the stream's own window of chunks, sliding it forward as newer
//!   chunk ids arrive and reporting the new floor to the group.
//! - Obtain chunks from the group and write heap payloads into them.
//! - On end-of-stream or stop, release every held chunk and tell the group.
//!
//! # States
//!
//! ```text
//! Running ──stop()──> Stopping ──flush──> Stopped
//!    └──────── transport ended ─flush──────┘
//! ```

use std::fmt;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::chunk::{ChunkCell, WriteOutcome};
use super::config::{ChunkStreamConfig, ConfigError, StreamConfig};
use super::group::{GroupShared, Obtained};
use super::heap::{Heap, HeapMetadata, collect_items};
use super::inproc::HeapSource;
use super::place::Placement;
use super::stats::{StreamCounter, StreamCounters, StreamStats};
use super::window::ChunkWindow;
use crate::runtime::Executor;
use crate::sync::{PushError, Ringbuffer};
use crate::trace::{debug, trace};

/// Lifecycle of a member stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberState {
    Running,
    /// A stop was requested; the worker has not flushed yet.
    Stopping,
    Stopped,
}

/// One stream of a [`ChunkStreamRingGroup`](super::ChunkStreamRingGroup).
///
/// Handles compare by identity.
pub struct ChunkStreamGroupMember {
    index: usize,
    /// Group head when the stream joined.
    initial_head: i64,
    group: Arc<GroupShared>,
    executor: Arc<dyn Executor>,
    stream_config: StreamConfig,
    chunk_config: ChunkStreamConfig,
    /// Decoded heaps waiting for the worker.
    heaps: Ringbuffer<Heap>,
    stop_requested: AtomicBool,
    state: Mutex<MemberState>,
    counters: StreamCounters,
}

impl ChunkStreamGroupMember {
    pub(crate) fn new(
        index: usize,
        initial_head: i64,
        group: Arc<GroupShared>,
        executor: Arc<dyn Executor>,
        stream_config: StreamConfig,
        chunk_config: ChunkStreamConfig,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            index,
            initial_head,
            group,
            executor,
            heaps: Ringbuffer::new(stream_config.max_heaps())?,
            stream_config,
            chunk_config,
            stop_requested: AtomicBool::new(false),
            state: Mutex::new(MemberState::Running),
            counters: StreamCounters::default(),
        })
    }

    /// Position of the stream within its group.
    #[inline]
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    #[must_use]
    pub const fn stream_config(&self) -> &StreamConfig {
        &self.stream_config
    }

    #[must_use]
    pub const fn chunk_config(&self) -> &ChunkStreamConfig {
        &self.chunk_config
    }

    #[must_use]
    pub fn state(&self) -> MemberState {
        *self.state.lock()
    }

    #[must_use]
    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    /// Attaches a transport. The reader runs on the stream's executor and
    /// blocks on the heap queue while the assembler is behind. The stream
    /// sees end-of-stream once every attached reader's source has ended.
    ///
    /// # Errors
    ///
    /// Returns an error if the executor could not start the reader. The
    /// reader then counts as ended.
    pub fn add_reader(self: &Arc<Self>, mut source: impl HeapSource) -> io::Result<()> {
        self.heaps.add_producer();
        let member = Arc::clone(self);
        let name = format!("braid-reader-{}", self.index);
        let started = self.executor.execute(
            name,
            Box::new(move || {
                while let Some(heap) = source.recv() {
                    if member.heaps.put(heap).is_err() {
                        break;
                    }
                }
                debug!(stream = member.index, "reader finished");
                member.heaps.remove_producer();
            }),
        );
        if started.is_err() {
            self.heaps.remove_producer();
        }
        started
    }

    /// Pushes a heap straight into the stream, blocking while the heap queue
    /// is full.
    ///
    /// # Errors
    ///
    /// Returns the heap if the stream has stopped or ended.
    pub fn add_heap(&self, heap: Heap) -> Result<(), PushError<Heap>> {
        self.heaps.put(heap)
    }

    /// Signals end-of-stream for heaps pushed with
    /// [`add_heap`](Self::add_heap): queued heaps are still processed, then
    /// the stream flushes and stops.
    pub fn end_of_stream(&self) {
        self.heaps.stop();
    }

    /// Stops the stream without waiting for its transport. Queued heaps are
    /// discarded and every chunk the stream holds is released, however full.
    /// Idempotent; returns without waiting for the worker to flush.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if *state == MemberState::Running {
                *state = MemberState::Stopping;
            }
        }
        self.stop_requested.store(true, Ordering::Release);
        self.heaps.stop();
    }

    /// Starts the assembler on the executor.
    pub(crate) fn start(self: &Arc<Self>) -> io::Result<()> {
        let member = Arc::clone(self);
        let name = format!("braid-stream-{}", self.index);
        self.executor
            .execute(name, Box::new(move || Assembler::new(member).run()))
    }

    fn finish(&self) {
        *self.state.lock() = MemberState::Stopped;
    }
}

impl PartialEq for ChunkStreamGroupMember {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for ChunkStreamGroupMember {}

impl fmt::Debug for ChunkStreamGroupMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStreamGroupMember")
            .field("index", &self.index)
            .field("state", &self.state())
            .field("max_chunks", &self.chunk_config.max_chunks())
            .field("max_heaps", &self.stream_config.max_heaps())
            .finish_non_exhaustive()
    }
}

/// Hands the stream's holds back to the group when the worker exits, also
/// when it unwinds out of a panicking placement callback.
struct WorkerExit(Arc<ChunkStreamGroupMember>);

impl Drop for WorkerExit {
    fn drop(&mut self) {
        let member = &self.0;
        // Readers blocked on a full queue must not outlive the worker.
        member.heaps.stop();
        member.finish();
        member.group.stream_finished(member.index);
    }
}

/// Whether the worker keeps going after a heap.
enum Flow {
    Continue,
    /// The group refused to hand out chunks: it is shutting down.
    Stop,
}

/// Worker-side state of a member stream; lives on the worker thread.
struct Assembler {
    member: Arc<ChunkStreamGroupMember>,
    window: ChunkWindow<Arc<ChunkCell>>,
    /// Reused buffer for the configured item values of the current heap.
    item_values: Vec<Option<u64>>,
}

impl Assembler {
    fn new(member: Arc<ChunkStreamGroupMember>) -> Self {
        let window = ChunkWindow::new(member.chunk_config.max_chunks());
        let item_values = Vec::with_capacity(member.chunk_config.items().len());
        Self {
            member,
            window,
            item_values,
        }
    }

    fn run(mut self) {
        let _exit = WorkerExit(Arc::clone(&self.member));
        debug!(stream = self.member.index, "stream worker started");
        self.window.advance(self.member.initial_head, |_, _| {});

        loop {
            if self.member.stop_requested.load(Ordering::Acquire) {
                debug!(stream = self.member.index, "stop requested");
                break;
            }
            let Ok(heap) = self.member.heaps.get() else {
                debug!(stream = self.member.index, "end of stream");
                break;
            };
            if let Flow::Stop = self.process(&heap) {
                debug!(stream = self.member.index, "group stopping");
                break;
            }
        }

        self.window.flush_all(|_, _| {});
        debug!(stream = self.member.index, stats = ?self.member.stats(), "stream worker stopped");
    }

    fn process(&mut self, heap: &Heap) -> Flow {
        let member = &*self.member;
        member.counters.bump(StreamCounter::Heaps);

        collect_items(heap, member.chunk_config.items(), &mut self.item_values);
        let metadata = HeapMetadata::new(heap.cnt(), heap.payload().len(), &self.item_values);
        let Placement::Accept {
            chunk_id,
            heap_index,
            heap_offset,
        } = member.chunk_config.place().place(&metadata)
        else {
            trace!(stream = member.index, heap_cnt = heap.cnt(), "heap rejected by placement");
            member.counters.bump(StreamCounter::RejectedHeaps);
            return Flow::Continue;
        };
        // No window can reach past the last id.
        if chunk_id == i64::MAX {
            debug!(stream = member.index, heap_cnt = heap.cnt(), "chunk id out of range");
            member.counters.bump(StreamCounter::RejectedHeaps);
            return Flow::Continue;
        }

        if chunk_id < self.window.head() {
            trace!(
                stream = member.index,
                chunk_id = chunk_id,
                head = self.window.head(),
                "heap too old for stream window"
            );
            member.counters.bump(StreamCounter::TooOldHeaps);
            return Flow::Continue;
        }

        if chunk_id >= self.window.tail() {
            let new_head = self.window.head_for(chunk_id);
            self.window.advance(new_head, |_, _| {});
            member.group.advance_stream(member.index, new_head);
        }

        let outcome = match self.window.get(chunk_id) {
            Some(cell) => cell.write(heap_index, heap_offset, heap.payload()),
            None => match member.group.get_chunk(chunk_id) {
                Obtained::Chunk(cell) => {
                    debug_assert_eq!(cell.chunk_id(), chunk_id);
                    member.counters.bump(StreamCounter::Chunks);
                    let outcome = cell.write(heap_index, heap_offset, heap.payload());
                    self.window.insert(chunk_id, cell);
                    outcome
                }
                Obtained::TooOld => {
                    trace!(stream = member.index, chunk_id = chunk_id, "heap too old for group window");
                    member.counters.bump(StreamCounter::TooOldHeaps);
                    return Flow::Continue;
                }
                Obtained::Stopped => return Flow::Stop,
            },
        };

        match outcome {
            WriteOutcome::Written => member.counters.bump(StreamCounter::PlacedHeaps),
            WriteOutcome::Evicted => {
                trace!(stream = member.index, chunk_id = chunk_id, "chunk already evicted");
                member.counters.bump(StreamCounter::LateHeaps);
            }
            WriteOutcome::OutOfRange => {
                debug!(
                    stream = member.index,
                    chunk_id = chunk_id,
                    heap_index = heap_index,
                    heap_offset = heap_offset,
                    len = heap.payload().len(),
                    "placement outside chunk"
                );
                member.counters.bump(StreamCounter::RejectedHeaps);
            }
        }
        Flow::Continue
    }
}
