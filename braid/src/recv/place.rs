//! Placement: mapping a heap to a slot of a chunk.
//!
//! The placement callback is the only place where heap contents are
//! interpreted. It must be pure with respect to group state; the assembler
//! copies the payload and sets the presence bit for an accepted placement.

use super::heap::HeapMetadata;

/// Decision returned by a [`Place`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Drop the heap silently.
    Reject,
    /// Store the heap payload in chunk `chunk_id`, marking slot `heap_index`
    /// present and copying the payload to `heap_offset` in the chunk data.
    Accept {
        chunk_id: i64,
        heap_index: usize,
        heap_offset: usize,
    },
}

/// User-supplied placement callback.
///
/// Invoked synchronously from the stream worker for every heap.
pub trait Place: Send + Sync {
    fn place(&self, heap: &HeapMetadata<'_>) -> Placement;
}

impl<F> Place for F
where
    F: Fn(&HeapMetadata<'_>) -> Placement + Send + Sync,
{
    #[inline]
    fn place(&self, heap: &HeapMetadata<'_>) -> Placement {
        self(heap)
    }
}

/// Pins closure signature inference to [`Place`].
///
/// ```
/// use braid::recv::{ChunkStreamConfig, Placement, place_fn};
///
/// let config = ChunkStreamConfig::new(place_fn(|heap| match heap.item(0) {
///     Some(pos) => Placement::Accept {
///         chunk_id: (pos / 8) as i64,
///         heap_index: (pos % 8) as usize,
///         heap_offset: (pos % 8) as usize * 1024,
///     },
///     None => Placement::Reject,
/// }));
/// assert_eq!(config.max_chunks(), ChunkStreamConfig::DEFAULT_MAX_CHUNKS);
/// ```
pub fn place_fn<F>(f: F) -> F
where
    F: Fn(&HeapMetadata<'_>) -> Placement + Send + Sync,
{
    f
}

/// Placement for streams whose heaps carry a running position counter.
///
/// Reads the position from the first configured item, and expects the
/// second configured item to be the heap length. Heap `pos` lands in chunk
/// `pos / heaps_per_chunk` at slot `pos % heaps_per_chunk`; heaps whose
/// length differs from `heap_payload_size` are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearPlacement {
    heaps_per_chunk: usize,
    heap_payload_size: usize,
}

impl LinearPlacement {
    /// # Panics
    ///
    /// Panics if `heaps_per_chunk` is zero.
    #[must_use]
    pub const fn new(heaps_per_chunk: usize, heap_payload_size: usize) -> Self {
        assert!(heaps_per_chunk > 0, "heaps_per_chunk must be > 0");
        Self {
            heaps_per_chunk,
            heap_payload_size,
        }
    }

    #[inline]
    #[must_use]
    pub const fn heaps_per_chunk(&self) -> usize {
        self.heaps_per_chunk
    }

    /// Size of the chunk payload this placement fills.
    #[inline]
    #[must_use]
    pub const fn chunk_payload_size(&self) -> usize {
        self.heaps_per_chunk * self.heap_payload_size
    }
}

impl Place for LinearPlacement {
    fn place(&self, heap: &HeapMetadata<'_>) -> Placement {
        let (Some(position), Some(length)) = (heap.item(0), heap.item(1)) else {
            return Placement::Reject;
        };
        if length != self.heap_payload_size as u64 {
            return Placement::Reject;
        }
        let per_chunk = self.heaps_per_chunk as u64;
        let Ok(chunk_id) = i64::try_from(position / per_chunk) else {
            return Placement::Reject;
        };
        let heap_index = (position % per_chunk) as usize;
        Placement::Accept {
            chunk_id,
            heap_index,
            heap_offset: heap_index * self.heap_payload_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_placement_maps_position() {
        let place = LinearPlacement::new(4, 16);
        let items = [Some(9), Some(16)];
        assert_eq!(
            place.place(&HeapMetadata::new(0, 16, &items)),
            Placement::Accept {
                chunk_id: 2,
                heap_index: 1,
                heap_offset: 16,
            }
        );
        assert_eq!(place.chunk_payload_size(), 64);
    }

    #[test]
    fn linear_placement_rejects_bad_heaps() {
        let place = LinearPlacement::new(4, 16);
        // Missing position.
        assert_eq!(
            place.place(&HeapMetadata::new(0, 16, &[None, Some(16)])),
            Placement::Reject
        );
        // Wrong length.
        assert_eq!(
            place.place(&HeapMetadata::new(0, 8, &[Some(1), Some(8)])),
            Placement::Reject
        );
    }

    #[test]
    fn closures_are_placements() {
        let place = place_fn(|heap| {
            if heap.heap_cnt() % 2 == 0 {
                Placement::Reject
            } else {
                Placement::Accept {
                    chunk_id: 0,
                    heap_index: 0,
                    heap_offset: 0,
                }
            }
        });
        assert_eq!(place.place(&HeapMetadata::new(2, 0, &[])), Placement::Reject);
        assert!(matches!(
            place.place(&HeapMetadata::new(3, 0, &[])),
            Placement::Accept { .. }
        ));
    }
}
