//! Forward-only window of chunks indexed by chunk id.
//!
//! # Design
//!
//! - Fixed-size circular buffer; chunk `id` lives in slot `id mod max_chunks`
//! - `head` is the oldest id still admitted; ids below it are never
//!   re-admitted
//! - Ids in `[head, head + max_chunks)` are in the window, whether or not a
//!   chunk has been placed there yet
//! - Advancing the head hands every occupied slot below the new head to a
//!   callback, oldest first
//! - The tail saturates at `i64::MAX`, so that id is never admitted
//!
//! Used both by each stream (its private view of the chunks it writes) and
//! by the group (the chunks under construction across all streams).

/// Circular buffer of per-chunk entries.
///
/// # Invariants
///
/// - Every occupied slot holds an id in `[head, head + max_chunks)`
/// - `head` never decreases
#[derive(Debug)]
pub(crate) struct ChunkWindow<T> {
    slots: Box<[Option<(i64, T)>]>,
    head: i64,
}

impl<T> ChunkWindow<T> {
    /// Creates an empty window whose head is chunk 0.
    ///
    /// # Panics
    ///
    /// Panics if `max_chunks` is 0.
    pub(crate) fn new(max_chunks: usize) -> Self {
        assert!(max_chunks > 0, "ChunkWindow capacity must be > 0");
        Self {
            slots: (0..max_chunks).map(|_| None).collect(),
            head: 0,
        }
    }

    #[inline]
    pub(crate) fn max_chunks(&self) -> usize {
        self.slots.len()
    }

    /// Oldest chunk id still admitted.
    #[inline]
    pub(crate) const fn head(&self) -> i64 {
        self.head
    }

    #[inline]
    fn span(&self) -> i64 {
        i64::try_from(self.slots.len()).unwrap_or(i64::MAX)
    }

    /// First chunk id past the window.
    #[inline]
    pub(crate) fn tail(&self) -> i64 {
        self.head.saturating_add(self.span())
    }

    /// Head the window needs so that `chunk_id` fits.
    #[inline]
    pub(crate) fn head_for(&self, chunk_id: i64) -> i64 {
        chunk_id.saturating_sub(self.span() - 1)
    }

    #[inline]
    fn slot_index(&self, chunk_id: i64) -> usize {
        chunk_id.rem_euclid(self.span()) as usize
    }

    #[inline]
    pub(crate) fn contains(&self, chunk_id: i64) -> bool {
        chunk_id >= self.head && chunk_id < self.tail()
    }

    pub(crate) fn get(&self, chunk_id: i64) -> Option<&T> {
        if !self.contains(chunk_id) {
            return None;
        }
        match &self.slots[self.slot_index(chunk_id)] {
            Some((id, value)) if *id == chunk_id => Some(value),
            _ => None,
        }
    }

    /// Stores `value` for `chunk_id`, which must be inside the window and
    /// not yet occupied.
    pub(crate) fn insert(&mut self, chunk_id: i64, value: T) {
        debug_assert!(self.contains(chunk_id), "chunk {chunk_id} outside window");
        let idx = self.slot_index(chunk_id);
        debug_assert!(self.slots[idx].is_none(), "chunk {chunk_id} already present");
        self.slots[idx] = Some((chunk_id, value));
    }

    /// Moves the head forward to `new_head`, passing every occupied slot
    /// below it to `ready` in ascending id order. No-op if `new_head` is not
    /// ahead of the current head.
    pub(crate) fn advance(&mut self, new_head: i64, mut ready: impl FnMut(i64, T)) {
        if new_head <= self.head {
            return;
        }
        let end = new_head.min(self.tail());
        for id in self.head..end {
            let idx = self.slot_index(id);
            if let Some((slot_id, value)) = self.slots[idx].take() {
                debug_assert_eq!(slot_id, id);
                ready(slot_id, value);
            }
        }
        self.head = new_head;
    }

    /// Hands out every occupied slot in ascending order and moves the head to
    /// the tail.
    pub(crate) fn flush_all(&mut self, ready: impl FnMut(i64, T)) {
        let tail = self.tail();
        self.advance(tail, ready);
    }

    /// Number of occupied slots.
    #[cfg(test)]
    pub(crate) fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}
