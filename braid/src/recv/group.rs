//! Group coordinator: merges member streams into one ordered chunk sequence.
//!
//! Every chunk id in the group window is shared by all member streams. A
//! stream holds each id at or above its own window head, so a chunk's hold
//! count is the number of live streams whose head has not passed it. Chunks
//! leave the window strictly in ascending id order, either when every stream
//! has released them or, in [`EvictionMode::Lossy`], when a stream needs room
//! for a newer id. Evicted chunks queue in `pending` and a single deliverer
//! pushes them to the data ring outside the group lock, which keeps the data
//! ring strictly increasing.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──stop()──> Stopping ──all streams flushed──> Stopped
//! ```
//!
//! Each group registers as a producer on its data ring. When the last stream
//! finishes on its own, the remaining chunks are flushed and, once they are
//! delivered, the group unregisters. The ring stops when its last producer
//! leaves, so several groups can feed one data ring.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::ops::Index;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use minstant::Instant;
use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use super::chunk::{Chunk, ChunkCell};
use super::config::{ChunkStreamConfig, ChunkStreamGroupConfig, ConfigError, EvictionMode, StreamConfig};
use super::stats::{GroupCounters, GroupStats};
use super::stream::ChunkStreamGroupMember;
use super::window::ChunkWindow;
use crate::runtime::Executor;
use crate::seq::SeqView;
use crate::sync::{PopError, PushError, Ringbuffer, Stopped};
use crate::trace::{debug, info, trace, warn};

/// How often `stop` rechecks a delivery blocked on a full data ring.
const STOP_POLL: Duration = Duration::from_millis(1);

/// Ring of chunk buffers, used for both the data and the free ring.
pub type ChunkRing = Ringbuffer<Box<Chunk>>;

/// Errors from group operations.
#[derive(Debug, Error)]
pub enum GroupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("chunk stream group has been stopped")]
    Stopped,

    #[error("failed to start stream worker: {0}")]
    Spawn(#[from] io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Stopping,
    Stopped,
}

/// Answer to a stream asking for a chunk.
pub(crate) enum Obtained {
    Chunk(Arc<ChunkCell>),
    /// The id is below the group window.
    TooOld,
    /// The group is shutting down.
    Stopped,
}

struct GroupState {
    window: ChunkWindow<Arc<ChunkCell>>,
    /// Window head per member; `None` once the member has finished.
    stream_heads: Vec<Option<i64>>,
    live_streams: usize,
    /// Evicted chunks awaiting delivery, ascending.
    pending: VecDeque<Box<Chunk>>,
    /// Some thread is pushing `pending` to the data ring.
    delivering: bool,
    lifecycle: Lifecycle,
    /// Every stream finished and the window was flushed.
    flushed: bool,
    /// The group's producer slot on the data ring was given back.
    producer_released: bool,
}

impl GroupState {
    /// Lowest head over live streams.
    fn floor(&self) -> Option<i64> {
        self.stream_heads.iter().flatten().copied().min()
    }

    /// Evicts everything below `new_head` into `pending`.
    fn evict_until(&mut self, new_head: i64) {
        let pending = &mut self.pending;
        self.window.advance(new_head, |_, cell| {
            if let Some(chunk) = cell.take() {
                trace!(chunk_id = chunk.chunk_id(), present = chunk.present_count(), "chunk evicted");
                pending.push_back(chunk);
            }
        });
    }

    /// Evicts every chunk no live stream holds.
    fn evict_released(&mut self) {
        if let Some(floor) = self.floor() {
            self.evict_until(floor);
        }
    }

    fn flush_all(&mut self) {
        let tail = self.window.tail();
        self.evict_until(tail);
    }
}

/// State shared between the group handle and its member workers.
pub(crate) struct GroupShared {
    config: ChunkStreamGroupConfig,
    state: Mutex<GroupState>,
    /// Signalled whenever heads move, streams finish, deliveries complete or
    /// the lifecycle changes.
    progress: Condvar,
    data_ring: Arc<ChunkRing>,
    free_ring: Arc<ChunkRing>,
    counters: GroupCounters,
}

impl GroupShared {
    /// Registers a new member and returns its index and starting head.
    fn register(&self) -> Result<(usize, i64), GroupError> {
        let mut state = self.state.lock();
        if state.lifecycle != Lifecycle::Running || state.flushed || self.data_ring.is_stopped() {
            return Err(GroupError::Stopped);
        }
        let head = state.window.head();
        state.stream_heads.push(Some(head));
        state.live_streams += 1;
        Ok((state.stream_heads.len() - 1, head))
    }

    /// Records that `stream` no longer holds anything below `new_head`.
    pub(crate) fn advance_stream(&self, stream: usize, new_head: i64) {
        let mut state = self.state.lock();
        if let Some(head) = state.stream_heads[stream].as_mut() {
            *head = (*head).max(new_head);
        }
        if state.lifecycle != Lifecycle::Running {
            return;
        }
        state.evict_released();
        self.progress.notify_all();
        self.deliver(&mut state);
    }

    /// Returns the chunk for `chunk_id`, allocating it from the free ring if
    /// no stream has touched it yet. The caller must already have advanced
    /// its own head so that `chunk_id` is inside its window.
    ///
    /// Blocks while the free ring is empty and, in lossless mode, while
    /// slower streams still hold the chunks that would have to be evicted.
    pub(crate) fn get_chunk(&self, chunk_id: i64) -> Obtained {
        let mut stall: Option<Instant> = None;
        let mut state = self.state.lock();
        let obtained = loop {
            if state.lifecycle != Lifecycle::Running {
                break Obtained::Stopped;
            }
            if chunk_id < state.window.head() {
                break Obtained::TooOld;
            }
            if chunk_id >= state.window.tail() {
                let target = state.window.head_for(chunk_id);
                match self.config.eviction_mode() {
                    EvictionMode::Lossy => {
                        trace!(chunk_id = chunk_id, new_head = target, "forcing eviction");
                        state.evict_until(target);
                        self.progress.notify_all();
                    }
                    EvictionMode::Lossless => {
                        let floor = state.floor().unwrap_or(target);
                        if floor < target {
                            stall.get_or_insert_with(Instant::now);
                            self.progress.wait(&mut state);
                            continue;
                        }
                        state.evict_until(floor);
                    }
                }
            }
            // Evicted chunks are what refills the free ring, so they go out
            // before anything is allocated.
            if !state.pending.is_empty() || state.delivering {
                if state.delivering {
                    self.progress.wait(&mut state);
                } else {
                    self.deliver(&mut state);
                }
                continue;
            }
            if let Some(cell) = state.window.get(chunk_id) {
                break Obtained::Chunk(Arc::clone(cell));
            }
            // Nothing is pending or in delivery and at most `max_chunks - 1`
            // chunks are resident, so with a pool of `max_chunks` the rest are
            // with the consumer. The lock stays held: no other stream may
            // claim the buffer for a different id while this one waits.
            let chunk = match self.free_ring.try_get() {
                Ok(chunk) => chunk,
                Err(PopError::Stopped) => break Obtained::Stopped,
                Err(PopError::Empty) => match self.free_ring.get() {
                    Ok(chunk) => chunk,
                    Err(Stopped) => break Obtained::Stopped,
                },
            };
            let cell = ChunkCell::new(chunk_id, chunk);
            state.window.insert(chunk_id, Arc::clone(&cell));
            trace!(chunk_id = cell.chunk_id(), "chunk allocated");
            break Obtained::Chunk(cell);
        };
        drop(state);

        if let Some(start) = stall {
            let nanos = u64::try_from(start.elapsed().as_nanos()).unwrap_or(u64::MAX);
            debug!(chunk_id = chunk_id, stall_ns = nanos, "lossless stall");
            self.counters.stalled(nanos);
        }
        obtained
    }

    /// Releases every hold of `stream`. Called once, by the stream's worker,
    /// as its last group operation.
    pub(crate) fn stream_finished(&self, stream: usize) {
        let mut state = self.state.lock();
        if state.stream_heads[stream].take().is_some() {
            state.live_streams -= 1;
        }
        debug!(stream = stream, live = state.live_streams, "stream finished");
        self.progress.notify_all();
        if state.lifecycle != Lifecycle::Running {
            return;
        }
        if state.live_streams == 0 {
            state.flush_all();
            state.flushed = true;
            info!(pending = state.pending.len(), "all streams finished");
        } else {
            state.evict_released();
        }
        self.deliver(&mut state);
    }

    /// Runs the ready hook and pushes `chunk` to the data ring.
    fn hand_over(&self, mut chunk: Box<Chunk>, blocking: bool) -> Result<(), PushError<Box<Chunk>>> {
        if let Some(ready) = self.config.ready() {
            let hooked = panic::catch_unwind(AssertUnwindSafe(|| ready.ready(&mut chunk)));
            if hooked.is_err() {
                warn!(chunk_id = chunk.chunk_id(), "ready hook panicked");
            }
        }
        if blocking {
            self.data_ring.put(chunk)
        } else {
            self.data_ring.try_put(chunk)
        }
    }

    /// Pushes `pending` to the data ring in order, releasing the lock around
    /// each push. Only one thread delivers at a time; if another is already
    /// at it, that thread will pick up whatever was just queued.
    ///
    /// Once the group is stopping, pushes no longer block: delivery ends as
    /// soon as the data ring is full and [`stop`](Self::stop) discards what
    /// is left.
    fn deliver(&self, state: &mut MutexGuard<'_, GroupState>) {
        if state.delivering {
            return;
        }
        state.delivering = true;
        loop {
            let blocking = state.lifecycle == Lifecycle::Running;
            if !blocking && self.data_ring.full() {
                break;
            }
            let Some(chunk) = state.pending.pop_front() else {
                break;
            };
            let _chunk_id = chunk.chunk_id();
            let pushed = MutexGuard::unlocked(state, || self.hand_over(chunk, blocking));
            match pushed {
                Ok(()) => {
                    trace!(chunk_id = _chunk_id, "chunk delivered");
                    self.counters.delivered();
                }
                Err(PushError::Full(_)) => {
                    debug!(chunk_id = _chunk_id, "data ring full while stopping, discarding chunk");
                    self.counters.discarded(1);
                }
                Err(PushError::Stopped(_)) => {
                    let discarded = 1 + state.pending.len();
                    state.pending.clear();
                    warn!(chunk_id = _chunk_id, discarded = discarded, "data ring stopped, discarding chunks");
                    self.counters.discarded(discarded as u64);
                }
            }
        }
        state.delivering = false;
        if state.flushed && state.pending.is_empty() && !state.producer_released {
            state.producer_released = true;
            if self.data_ring.remove_producer() {
                info!(stats = ?self.counters.snapshot(), "all chunks delivered, data ring stopped");
            } else {
                info!(stats = ?self.counters.snapshot(), "all chunks delivered");
            }
        }
        self.progress.notify_all();
    }

    /// Shuts the group down. See [`ChunkStreamRingGroup::stop`].
    fn stop(&self, members: &[Arc<ChunkStreamGroupMember>]) {
        // A stream waiting for a free chunk holds the group lock until this
        // wakes it.
        self.free_ring.stop();
        {
            let mut state = self.state.lock();
            if state.lifecycle != Lifecycle::Running {
                while state.lifecycle != Lifecycle::Stopped {
                    self.progress.wait(&mut state);
                }
                return;
            }
            state.lifecycle = Lifecycle::Stopping;
            self.progress.notify_all();
        }
        info!(streams = members.len(), "stopping chunk stream group");

        for member in members {
            member.stop();
        }

        let mut state = self.state.lock();
        state.flush_all();
        // A delivery in flight finishes its current chunk unless the consumer
        // has stopped reading; it then keeps going without blocking.
        while state.delivering && !self.data_ring.full() {
            self.progress.wait_for(&mut state, STOP_POLL);
        }
        // Hand over what fits without blocking; the rest cannot be delivered.
        self.deliver(&mut state);
        self.data_ring.stop();

        while state.delivering || state.live_streams > 0 {
            self.progress.wait(&mut state);
        }
        if !state.pending.is_empty() {
            let discarded = state.pending.len();
            state.pending.clear();
            debug!(discarded = discarded, "discarding undeliverable chunks");
            self.counters.discarded(discarded as u64);
        }
        state.lifecycle = Lifecycle::Stopped;
        self.progress.notify_all();
        drop(state);
        info!(stats = ?self.counters.snapshot(), "chunk stream group stopped");
    }
}

/// A set of streams assembling into one shared sequence of chunks, with
/// chunk buffers taken from a free ring and completed chunks pushed to a
/// data ring in strictly increasing id order.
///
/// The consumer reads chunks from [`data_ring`](Self::data_ring) until it
/// stops, and hands each buffer back with
/// [`add_free_chunk`](Self::add_free_chunk). The free ring must hold at least
/// [`max_chunks`](ChunkStreamGroupConfig::max_chunks) buffers, or streams
/// can starve waiting for one.
///
/// If the group config carries a [`Ready`](super::Ready) hook, it runs on
/// each chunk right before the chunk is pushed to the data ring.
///
/// Dropping the group stops it.
pub struct ChunkStreamRingGroup {
    shared: Arc<GroupShared>,
    members: Vec<Arc<ChunkStreamGroupMember>>,
}

impl ChunkStreamRingGroup {
    #[must_use]
    pub fn new(config: ChunkStreamGroupConfig, data_ring: Arc<ChunkRing>, free_ring: Arc<ChunkRing>) -> Self {
        info!(
            max_chunks = config.max_chunks(),
            eviction_mode = %config.eviction_mode(),
            "creating chunk stream group"
        );
        let state = GroupState {
            window: ChunkWindow::new(config.max_chunks()),
            stream_heads: Vec::new(),
            live_streams: 0,
            pending: VecDeque::new(),
            delivering: false,
            lifecycle: Lifecycle::Running,
            flushed: false,
            producer_released: false,
        };
        data_ring.add_producer();
        Self {
            shared: Arc::new(GroupShared {
                config,
                state: Mutex::new(state),
                progress: Condvar::new(),
                data_ring,
                free_ring,
                counters: GroupCounters::default(),
            }),
            members: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ChunkStreamGroupConfig {
        &self.shared.config
    }

    /// Ring the group pushes completed chunks to.
    #[must_use]
    pub fn data_ring(&self) -> &Arc<ChunkRing> {
        &self.shared.data_ring
    }

    /// Ring the group takes empty chunk buffers from.
    #[must_use]
    pub fn free_ring(&self) -> &Arc<ChunkRing> {
        &self.shared.free_ring
    }

    /// Adds a stream and starts its worker on `executor`. Attach transports
    /// to the returned member with
    /// [`add_reader`](ChunkStreamGroupMember::add_reader).
    ///
    /// # Errors
    ///
    /// - [`GroupError::Config`] if the stream's window is wider than the
    ///   group's in lossless mode, which could deadlock.
    /// - [`GroupError::Stopped`] once the group is stopping or finished.
    /// - [`GroupError::Spawn`] if the worker could not be started.
    pub fn add_stream(
        &mut self,
        executor: Arc<dyn Executor>,
        stream_config: StreamConfig,
        chunk_config: ChunkStreamConfig,
    ) -> Result<Arc<ChunkStreamGroupMember>, GroupError> {
        let group_max = self.shared.config.max_chunks();
        if self.shared.config.eviction_mode() == EvictionMode::Lossless && chunk_config.max_chunks() > group_max {
            return Err(ConfigError::StreamWindowExceedsGroup {
                stream: chunk_config.max_chunks(),
                group: group_max,
            }
            .into());
        }

        let (index, head) = self.shared.register()?;
        let member = match ChunkStreamGroupMember::new(
            index,
            head,
            Arc::clone(&self.shared),
            executor,
            stream_config,
            chunk_config,
        ) {
            Ok(member) => Arc::new(member),
            Err(err) => {
                self.shared.stream_finished(index);
                return Err(err.into());
            }
        };
        if let Err(err) = member.start() {
            warn!(stream = index, error = %err, "failed to start stream worker");
            self.shared.stream_finished(index);
            return Err(err.into());
        }
        debug!(stream = index, head = head, "stream added");
        self.members.push(Arc::clone(&member));
        Ok(member)
    }

    /// Returns a chunk buffer to the free ring after clearing it. Chunks
    /// returned after the group stopped are dropped.
    pub fn add_free_chunk(&self, mut chunk: Box<Chunk>) {
        chunk.reset();
        if self.shared.free_ring.put(chunk).is_err() {
            trace!("free ring stopped, dropping chunk");
        }
    }

    /// Stops the group and every member stream.
    ///
    /// The free ring is stopped, chunks still being assembled are flushed to
    /// the data ring as far as it has room, and the data ring is stopped so
    /// the consumer drains what was delivered and then sees the end. Returns
    /// once every stream worker has exited. Idempotent.
    pub fn stop(&self) {
        self.shared.stop(&self.members);
    }

    /// The member streams, in the order they were added.
    #[must_use]
    pub fn streams(&self) -> SeqView<'_, Arc<ChunkStreamGroupMember>> {
        SeqView::new(&self.members)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Arc<ChunkStreamGroupMember>> {
        self.members.get(index)
    }

    #[must_use]
    pub fn stats(&self) -> GroupStats {
        self.shared.counters.snapshot()
    }
}

impl Index<usize> for ChunkStreamRingGroup {
    type Output = Arc<ChunkStreamGroupMember>;

    fn index(&self, index: usize) -> &Self::Output {
        &self.members[index]
    }
}

impl Drop for ChunkStreamRingGroup {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for ChunkStreamRingGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStreamRingGroup")
            .field("config", &self.shared.config)
            .field("streams", &self.members.len())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::recv::heap::{HEAP_LENGTH_ID, Heap, Item};
    use crate::recv::place::{LinearPlacement, Place, Placement, place_fn};
    use crate::runtime::ThreadExecutor;

    const HEAPS_PER_CHUNK: usize = 2;
    const HEAP_SIZE: usize = 4;
    const POSITION_ID: u64 = 0x1000;

    fn free_ring(chunks: usize) -> Arc<ChunkRing> {
        let free = Arc::new(ChunkRing::new(chunks).unwrap());
        for _ in 0..chunks {
            free.try_put(Box::new(Chunk::new(HEAPS_PER_CHUNK, HEAPS_PER_CHUNK * HEAP_SIZE)))
                .unwrap();
        }
        free
    }

    fn rings(chunks: usize) -> (Arc<ChunkRing>, Arc<ChunkRing>) {
        (Arc::new(ChunkRing::new(chunks).unwrap()), free_ring(chunks))
    }

    /// Runs `f` on its own thread and fails the test if it takes longer
    /// than `limit`.
    fn within<T: Send + 'static>(limit: Duration, f: impl FnOnce() -> T + Send + 'static) -> T {
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(f());
        });
        rx.recv_timeout(limit).expect("timed out")
    }

    /// Pushes heaps for `positions` into `member` from a new thread, then
    /// ends the stream.
    fn feed(
        member: &Arc<ChunkStreamGroupMember>,
        positions: impl IntoIterator<Item = usize> + Send + 'static,
    ) -> thread::JoinHandle<()> {
        let member = Arc::clone(member);
        thread::spawn(move || {
            for position in positions {
                if member.add_heap(heap(position)).is_err() {
                    break;
                }
            }
            member.end_of_stream();
        })
    }

    /// Reads the data ring until it stops, topping the free ring up with a
    /// fresh buffer for every chunk kept.
    fn drain(data: &ChunkRing, free: &ChunkRing) -> Vec<Box<Chunk>> {
        let mut chunks = Vec::new();
        for chunk in data.iter() {
            let spare = Box::new(Chunk::new(HEAPS_PER_CHUNK, HEAPS_PER_CHUNK * HEAP_SIZE));
            let _ = free.put(spare);
            chunks.push(chunk);
        }
        chunks
    }

    fn chunk_config(max_chunks: usize) -> ChunkStreamConfig {
        ChunkStreamConfig::new(LinearPlacement::new(HEAPS_PER_CHUNK, HEAP_SIZE))
            .with_items([POSITION_ID, HEAP_LENGTH_ID])
            .with_max_chunks(max_chunks)
            .unwrap()
    }

    fn heap(position: usize) -> Heap {
        Heap::new(
            position as u64,
            vec![Item::new(POSITION_ID, position as u64)],
            vec![position as u8; HEAP_SIZE],
        )
    }

    fn executor() -> Arc<dyn Executor> {
        Arc::new(ThreadExecutor::default())
    }

    #[test]
    fn lossless_rejects_wide_stream_window() {
        let (data, free) = rings(2);
        let config = ChunkStreamGroupConfig::new(2, EvictionMode::Lossless).unwrap();
        let mut group = ChunkStreamRingGroup::new(config, data, free);
        let err = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(3))
            .unwrap_err();
        assert!(matches!(
            err,
            GroupError::Config(ConfigError::StreamWindowExceedsGroup { stream: 3, group: 2 })
        ));
        assert!(group.is_empty());
    }

    #[test]
    fn lossy_allows_wide_stream_window() {
        let (data, free) = rings(2);
        let mut group = ChunkStreamRingGroup::new(ChunkStreamGroupConfig::default(), data, free);
        group
            .add_stream(executor(), StreamConfig::default(), chunk_config(3))
            .unwrap();
        assert_eq!(group.len(), 1);
        group.stop();
    }

    #[test]
    fn single_stream_delivers_in_order() {
        let (data, free) = rings(2);
        let mut group = ChunkStreamRingGroup::new(ChunkStreamGroupConfig::default(), Arc::clone(&data), free);
        let member = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();

        let feeder = {
            let member = Arc::clone(&member);
            std::thread::spawn(move || {
                for position in 0..4 * HEAPS_PER_CHUNK {
                    member.add_heap(heap(position)).unwrap();
                }
                member.end_of_stream();
            })
        };

        let mut ids = Vec::new();
        for chunk in data.iter() {
            assert!(chunk.is_complete());
            ids.push(chunk.chunk_id());
            group.add_free_chunk(chunk);
        }
        feeder.join().unwrap();
        assert_eq!(ids, vec![0, 1, 2, 3]);
        assert_eq!(group.stats().chunks_delivered, 4);
        assert_eq!(member.stats().placed_heaps, 8);
    }

    #[test]
    fn stop_is_idempotent_and_rejects_new_streams() {
        let (data, free) = rings(2);
        let mut group = ChunkStreamRingGroup::new(ChunkStreamGroupConfig::default(), Arc::clone(&data), free);
        let member = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();
        member.add_heap(heap(0)).unwrap();
        std::thread::sleep(Duration::from_millis(20));

        group.stop();
        group.stop();
        assert!(data.is_stopped());
        assert_eq!(member.state(), crate::recv::MemberState::Stopped);
        assert!(matches!(
            group.add_stream(executor(), StreamConfig::default(), chunk_config(2)),
            Err(GroupError::Stopped)
        ));

        // The partially filled chunk was flushed on stop.
        let chunk = data.get().unwrap();
        assert_eq!(chunk.chunk_id(), 0);
        assert_eq!(chunk.present(), &[1, 0]);
        assert!(data.get().is_err());
    }

    #[test]
    fn streams_view_compares_by_identity() {
        let (data, free) = rings(2);
        let mut group = ChunkStreamRingGroup::new(ChunkStreamGroupConfig::default(), data, free);
        let first = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();
        let second = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();

        let streams = group.streams();
        assert_eq!(streams.len(), 2);
        assert_eq!(streams.index(&second, None, None).unwrap(), 1);
        assert!(streams.contains(&first));
        assert!(Arc::ptr_eq(&group[0], &first));
        assert_eq!(first.index(), 0);
        assert_eq!(second.index(), 1);
        group.stop();
    }

    fn contending_streams_share_minimal_pool(mode: EvictionMode) {
        const STREAMS: usize = 4;
        const CHUNKS: usize = 16;

        // Pool, data ring and window are all as small as allowed, and every
        // stream writes every heap, so streams race for each chunk.
        let (data, free) = rings(2);
        let config = ChunkStreamGroupConfig::new(2, mode).unwrap();
        let mut group = ChunkStreamRingGroup::new(config, Arc::clone(&data), Arc::clone(&free));
        let members: Vec<_> = (0..STREAMS)
            .map(|_| {
                group
                    .add_stream(executor(), StreamConfig::default(), chunk_config(2))
                    .unwrap()
            })
            .collect();
        let feeders: Vec<_> = members
            .iter()
            .map(|member| feed(member, 0..CHUNKS * HEAPS_PER_CHUNK))
            .collect();

        let chunks = within(Duration::from_secs(10), move || drain(&data, &free));
        for feeder in feeders {
            feeder.join().unwrap();
        }
        let ids: Vec<i64> = chunks.iter().map(|chunk| chunk.chunk_id()).collect();
        assert_eq!(ids, (0..CHUNKS as i64).collect::<Vec<_>>());
        assert!(chunks.iter().all(|chunk| chunk.is_complete()));
        assert_eq!(group.stats().chunks_delivered, CHUNKS as u64);
        group.stop();
    }

    #[test]
    fn contending_streams_lossy() {
        contending_streams_share_minimal_pool(EvictionMode::Lossy);
    }

    #[test]
    fn contending_streams_lossless() {
        contending_streams_share_minimal_pool(EvictionMode::Lossless);
    }

    #[test]
    fn stop_wakes_stream_waiting_for_free_chunk() {
        // Nobody reads the data ring, so no buffer ever comes back.
        let (data, free) = rings(2);
        let config = ChunkStreamGroupConfig::new(2, EvictionMode::Lossy).unwrap();
        let mut group = ChunkStreamRingGroup::new(config, Arc::clone(&data), free);
        let member = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();
        let feeder = feed(&member, (0..6).map(|chunk| chunk * HEAPS_PER_CHUNK));
        thread::sleep(Duration::from_millis(50));

        let group = within(Duration::from_secs(5), move || {
            group.stop();
            group
        });
        feeder.join().unwrap();
        assert_eq!(member.state(), crate::recv::MemberState::Stopped);
        let ids: Vec<i64> = data.iter().map(|chunk| chunk.chunk_id()).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(group.stats().chunks_delivered, 2);
    }

    #[test]
    fn panicking_placement_releases_stream() {
        let linear = LinearPlacement::new(HEAPS_PER_CHUNK, HEAP_SIZE);
        let place = place_fn(move |heap| {
            assert_ne!(heap.item(0), Some(3), "corrupt heap");
            linear.place(heap)
        });
        let chunk_config = ChunkStreamConfig::new(place)
            .with_items([POSITION_ID, HEAP_LENGTH_ID])
            .with_max_chunks(2)
            .unwrap();

        let (data, free) = rings(2);
        let mut group = ChunkStreamRingGroup::new(ChunkStreamGroupConfig::default(), Arc::clone(&data), free);
        let member = group
            .add_stream(executor(), StreamConfig::default(), chunk_config)
            .unwrap();
        for position in 0..3 {
            member.add_heap(heap(position)).unwrap();
        }
        let _ = member.add_heap(heap(3));

        // The worker's exit hands its holds back, which ends the group.
        let ids: Vec<i64> = within(Duration::from_secs(5), move || {
            data.iter().map(|chunk| chunk.chunk_id()).collect()
        });
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(member.state(), crate::recv::MemberState::Stopped);
        within(Duration::from_secs(5), move || group.stop());
    }

    #[test]
    fn last_chunk_id_is_rejected() {
        let place = place_fn(|heap| match heap.item(0) {
            Some(0) => Placement::Accept {
                chunk_id: i64::MAX - 1,
                heap_index: 0,
                heap_offset: 0,
            },
            Some(_) => Placement::Accept {
                chunk_id: i64::MAX,
                heap_index: 1,
                heap_offset: HEAP_SIZE,
            },
            None => Placement::Reject,
        });
        let chunk_config = ChunkStreamConfig::new(place).with_items([POSITION_ID]);

        let (data, free) = rings(2);
        let mut group = ChunkStreamRingGroup::new(ChunkStreamGroupConfig::default(), Arc::clone(&data), free);
        let member = group
            .add_stream(executor(), StreamConfig::default(), chunk_config)
            .unwrap();
        feed(&member, 0..2).join().unwrap();

        let chunks: Vec<_> = data.iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id(), i64::MAX - 1);
        assert_eq!(chunks[0].present(), &[1, 0]);
        let stats = member.stats();
        assert_eq!(stats.placed_heaps, 1);
        assert_eq!(stats.rejected_heaps, 1);
    }

    #[test]
    fn ready_hook_runs_in_chunk_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let config = {
            let seen = Arc::clone(&seen);
            ChunkStreamGroupConfig::default().with_ready(move |chunk: &mut Chunk| {
                seen.lock().push(chunk.chunk_id());
                chunk.data_mut()[0] = 0xff;
            })
        };
        let (data, free) = rings(2);
        let mut group = ChunkStreamRingGroup::new(config, Arc::clone(&data), Arc::clone(&free));
        let member = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();
        let feeder = feed(&member, 0..4 * HEAPS_PER_CHUNK);

        let chunks = drain(&data, &free);
        feeder.join().unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
        assert!(chunks.iter().all(|chunk| chunk.data()[0] == 0xff));
        // Only the first byte was touched.
        assert!(chunks.iter().all(|chunk| chunk.data()[1] == chunk.chunk_id() as u8 * 2));
    }

    #[test]
    fn panicking_ready_hook_still_delivers() {
        let config = ChunkStreamGroupConfig::default().with_ready(|chunk: &mut Chunk| {
            assert_ne!(chunk.chunk_id(), 1, "bad chunk");
        });
        let (data, free) = rings(2);
        let mut group = ChunkStreamRingGroup::new(config, Arc::clone(&data), Arc::clone(&free));
        let member = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();
        let feeder = feed(&member, 0..3 * HEAPS_PER_CHUNK);

        let ids: Vec<i64> = within(Duration::from_secs(5), move || {
            drain(&data, &free).iter().map(|chunk| chunk.chunk_id()).collect()
        });
        feeder.join().unwrap();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn slow_ready_hook_keeps_chunks_on_stop() {
        let config = ChunkStreamGroupConfig::new(2, EvictionMode::Lossy)
            .unwrap()
            .with_ready(|chunk: &mut Chunk| {
                if chunk.chunk_id() == 0 {
                    thread::sleep(Duration::from_millis(50));
                }
            });
        let (data, free) = rings(4);
        let mut group = ChunkStreamRingGroup::new(config, Arc::clone(&data), free);
        let member = group
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();
        // Chunk 2 pushes chunk 0 out; its delivery is still in the hook when
        // the group stops.
        for chunk in 0..3 {
            member.add_heap(heap(chunk * HEAPS_PER_CHUNK)).unwrap();
        }
        thread::sleep(Duration::from_millis(20));
        group.stop();

        let ids: Vec<i64> = data.iter().map(|chunk| chunk.chunk_id()).collect();
        assert_eq!(ids, vec![0, 1]);
        let stats = group.stats();
        assert_eq!(stats.chunks_delivered, 2);
        assert_eq!(stats.chunks_discarded, 0);
    }

    #[test]
    fn groups_share_data_ring() {
        let data = Arc::new(ChunkRing::new(4).unwrap());
        let mut first = ChunkStreamRingGroup::new(ChunkStreamGroupConfig::default(), Arc::clone(&data), free_ring(2));
        let mut second = ChunkStreamRingGroup::new(ChunkStreamGroupConfig::default(), Arc::clone(&data), free_ring(2));
        let a = first
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();
        let b = second
            .add_stream(executor(), StreamConfig::default(), chunk_config(2))
            .unwrap();

        feed(&a, 0..2 * HEAPS_PER_CHUNK).join().unwrap();
        let early: Vec<i64> = (0..2).map(|_| data.get().unwrap().chunk_id()).collect();
        assert_eq!(early, vec![0, 1]);
        // The second group is still a producer.
        assert!(!data.is_stopped());

        feed(&b, 0..2 * HEAPS_PER_CHUNK).join().unwrap();
        let late: Vec<i64> = within(Duration::from_secs(5), move || {
            data.iter().map(|chunk| chunk.chunk_id()).collect()
        });
        assert_eq!(late, vec![0, 1]);
        assert_eq!(first.stats().chunks_delivered, 2);
        assert_eq!(second.stats().chunks_delivered, 2);
    }
}
