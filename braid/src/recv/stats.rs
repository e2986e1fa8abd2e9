//! Receive counters.
//!
//! Counters are relaxed atomics bumped on the hot path and read as a
//! [`StreamStats`] / [`GroupStats`] snapshot. Heap-level loss is reported
//! only here; it never surfaces as an error.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of one stream's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Heaps taken off the stream's heap queue.
    pub heaps: u64,
    /// Heaps the placement callback rejected, or placed outside the chunk.
    pub rejected_heaps: u64,
    /// Heaps for chunks below the stream or group window.
    pub too_old_heaps: u64,
    /// Heaps for chunks the group evicted while the stream still held them.
    pub late_heaps: u64,
    /// Heaps written into a chunk.
    pub placed_heaps: u64,
    /// Chunks this stream obtained from the group.
    pub chunks: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StreamCounters {
    heaps: AtomicU64,
    rejected_heaps: AtomicU64,
    too_old_heaps: AtomicU64,
    late_heaps: AtomicU64,
    placed_heaps: AtomicU64,
    chunks: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum StreamCounter {
    Heaps,
    RejectedHeaps,
    TooOldHeaps,
    LateHeaps,
    PlacedHeaps,
    Chunks,
}

impl StreamCounters {
    #[inline]
    pub(crate) fn bump(&self, counter: StreamCounter) {
        let cell = match counter {
            StreamCounter::Heaps => &self.heaps,
            StreamCounter::RejectedHeaps => &self.rejected_heaps,
            StreamCounter::TooOldHeaps => &self.too_old_heaps,
            StreamCounter::LateHeaps => &self.late_heaps,
            StreamCounter::PlacedHeaps => &self.placed_heaps,
            StreamCounter::Chunks => &self.chunks,
        };
        cell.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StreamStats {
        StreamStats {
            heaps: self.heaps.load(Ordering::Relaxed),
            rejected_heaps: self.rejected_heaps.load(Ordering::Relaxed),
            too_old_heaps: self.too_old_heaps.load(Ordering::Relaxed),
            late_heaps: self.late_heaps.load(Ordering::Relaxed),
            placed_heaps: self.placed_heaps.load(Ordering::Relaxed),
            chunks: self.chunks.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of group-wide counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Chunks pushed to the data ring.
    pub chunks_delivered: u64,
    /// Chunks dropped because the data ring was stopped before they fit.
    pub chunks_discarded: u64,
    /// Times a stream had to wait for other streams in lossless mode.
    pub lossless_stalls: u64,
    /// Total time spent in those waits, in nanoseconds.
    pub lossless_stall_nanos: u64,
}

#[derive(Debug, Default)]
pub(crate) struct GroupCounters {
    chunks_delivered: AtomicU64,
    chunks_discarded: AtomicU64,
    lossless_stalls: AtomicU64,
    lossless_stall_nanos: AtomicU64,
}

impl GroupCounters {
    #[inline]
    pub(crate) fn delivered(&self) {
        self.chunks_delivered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn discarded(&self, count: u64) {
        self.chunks_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn stalled(&self, nanos: u64) {
        self.lossless_stalls.fetch_add(1, Ordering::Relaxed);
        self.lossless_stall_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> GroupStats {
        GroupStats {
            chunks_delivered: self.chunks_delivered.load(Ordering::Relaxed),
            chunks_discarded: self.chunks_discarded.load(Ordering::Relaxed),
            lossless_stalls: self.lossless_stalls.load(Ordering::Relaxed),
            lossless_stall_nanos: self.lossless_stall_nanos.load(Ordering::Relaxed),
        }
    }
}
