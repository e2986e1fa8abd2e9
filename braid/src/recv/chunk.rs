//! Chunk buffers and the shared cell streams write them through.
//!
//! # Memory Layout
//!
//! ```text
//! Chunk
//! └── chunk_id: i64
//! └── present: [u8; heaps_per_chunk]   (1 = heap slot received)
//! └── data:    [u8; payload_size]      (heap payloads at placement offsets)
//! ```
//!
//! Chunks are allocated once by the application and recycled through the
//! free ring; the receive path never allocates payload memory.

use std::sync::Arc;

use parking_lot::Mutex;

/// A recyclable assembly buffer plus its presence bitmap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    chunk_id: i64,
    present: Vec<u8>,
    data: Vec<u8>,
}

impl Chunk {
    /// Creates a zeroed chunk with `heaps_per_chunk` presence slots and a
    /// `payload_size`-byte payload buffer.
    #[must_use]
    pub fn new(heaps_per_chunk: usize, payload_size: usize) -> Self {
        Self {
            chunk_id: -1,
            present: vec![0; heaps_per_chunk],
            data: vec![0; payload_size],
        }
    }

    /// Id assigned when the chunk was last handed out, `-1` if never used.
    #[inline]
    #[must_use]
    pub const fn chunk_id(&self) -> i64 {
        self.chunk_id
    }

    #[must_use]
    pub fn present(&self) -> &[u8] {
        &self.present
    }

    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    #[must_use]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Number of heap slots marked present.
    #[must_use]
    pub fn present_count(&self) -> usize {
        self.present.iter().filter(|&&p| p != 0).count()
    }

    /// Returns true if every heap slot was received.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.present.iter().all(|&p| p != 0)
    }

    /// Clears the presence bitmap. Payload bytes are left as they are; they
    /// are only meaningful where the bitmap says so.
    pub fn reset(&mut self) {
        self.present.fill(0);
    }

    pub(crate) fn assign(&mut self, chunk_id: i64) {
        self.chunk_id = chunk_id;
        self.reset();
    }

    /// Copies `payload` to `offset` and marks `heap_index` present.
    fn write_heap(&mut self, heap_index: usize, offset: usize, payload: &[u8]) -> bool {
        let Some(end) = offset.checked_add(payload.len()) else {
            return false;
        };
        if heap_index >= self.present.len() || end > self.data.len() {
            return false;
        }
        self.data[offset..end].copy_from_slice(payload);
        self.present[heap_index] = 1;
        true
    }
}

/// Result of writing a heap through a [`ChunkCell`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WriteOutcome {
    Written,
    /// The group already took the chunk out of the cell.
    Evicted,
    /// Slot or byte range outside the chunk.
    OutOfRange,
}

/// A chunk under construction, shared by every stream that placed a heap
/// into it and by the group window.
///
/// The lock is held only for the copy of a single heap. Eviction takes the
/// chunk out of the cell; writers that still hold the cell afterwards see it
/// empty and drop their heap.
#[derive(Debug)]
pub(crate) struct ChunkCell {
    chunk_id: i64,
    chunk: Mutex<Option<Box<Chunk>>>,
}

impl ChunkCell {
    pub(crate) fn new(chunk_id: i64, mut chunk: Box<Chunk>) -> Arc<Self> {
        chunk.assign(chunk_id);
        Arc::new(Self {
            chunk_id,
            chunk: Mutex::new(Some(chunk)),
        })
    }

    #[inline]
    pub(crate) const fn chunk_id(&self) -> i64 {
        self.chunk_id
    }

    pub(crate) fn write(&self, heap_index: usize, offset: usize, payload: &[u8]) -> WriteOutcome {
        let mut guard = self.chunk.lock();
        let Some(chunk) = guard.as_mut() else {
            return WriteOutcome::Evicted;
        };
        if chunk.write_heap(heap_index, offset, payload) {
            WriteOutcome::Written
        } else {
            WriteOutcome::OutOfRange
        }
    }

    /// Removes the chunk; `None` if it was already taken.
    pub(crate) fn take(&self) -> Option<Box<Chunk>> {
        self.chunk.lock().take()
    }
}
