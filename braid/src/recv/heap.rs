//! Decoded heaps as handed to the receive streams.
//!
//! Wire decoding happens elsewhere; this module only models the result: the
//! heap counter, the immediate items the placement callback may look at, and
//! the payload bytes that end up in a chunk.

use serde::{Deserialize, Serialize};

/// Identifier of a protocol item.
pub type ItemId = u64;

/// Heap counter item; its value identifies the heap within its stream.
pub const HEAP_CNT_ID: ItemId = 0x01;

/// Heap length item. Requesting it yields the payload length of the heap.
pub const HEAP_LENGTH_ID: ItemId = 0x02;

/// An immediate item carried by a heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub value: u64,
}

impl Item {
    #[must_use]
    pub const fn new(id: ItemId, value: u64) -> Self {
        Self { id, value }
    }
}

/// A fully received, decoded heap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heap {
    cnt: u64,
    items: Vec<Item>,
    payload: Vec<u8>,
}

impl Heap {
    #[must_use]
    pub const fn new(cnt: u64, items: Vec<Item>, payload: Vec<u8>) -> Self {
        Self {
            cnt,
            items,
            payload,
        }
    }

    #[inline]
    #[must_use]
    pub const fn cnt(&self) -> u64 {
        self.cnt
    }

    #[must_use]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Value of item `id`, if the heap carries it.
    ///
    /// [`HEAP_CNT_ID`] and [`HEAP_LENGTH_ID`] are always answered from the
    /// heap itself.
    #[must_use]
    pub fn item_value(&self, id: ItemId) -> Option<u64> {
        match id {
            HEAP_CNT_ID => Some(self.cnt),
            HEAP_LENGTH_ID => Some(self.payload.len() as u64),
            _ => self.items.iter().find(|item| item.id == id).map(|item| item.value),
        }
    }
}

/// What the placement callback sees of a heap.
#[derive(Debug, Clone, Copy)]
pub struct HeapMetadata<'a> {
    heap_cnt: u64,
    payload_len: usize,
    items: &'a [Option<u64>],
}

impl<'a> HeapMetadata<'a> {
    /// `items` holds the values of the stream's configured item ids, in
    /// configuration order.
    #[must_use]
    pub const fn new(heap_cnt: u64, payload_len: usize, items: &'a [Option<u64>]) -> Self {
        Self {
            heap_cnt,
            payload_len,
            items,
        }
    }

    #[inline]
    #[must_use]
    pub const fn heap_cnt(&self) -> u64 {
        self.heap_cnt
    }

    #[inline]
    #[must_use]
    pub const fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Values of the configured items; `None` where the heap lacks the item.
    #[inline]
    #[must_use]
    pub const fn items(&self) -> &'a [Option<u64>] {
        self.items
    }

    /// Value of the `index`-th configured item.
    #[must_use]
    pub fn item(&self, index: usize) -> Option<u64> {
        self.items.get(index).copied().flatten()
    }
}

/// Resolves configured item ids against a heap, reusing `out`'s allocation.
pub(crate) fn collect_items(heap: &Heap, ids: &[ItemId], out: &mut Vec<Option<u64>>) {
    out.clear();
    out.extend(ids.iter().map(|&id| heap.item_value(id)));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_items_answered_from_heap() {
        let heap = Heap::new(17, vec![Item::new(0x1000, 5)], vec![0u8; 24]);
        assert_eq!(heap.item_value(HEAP_CNT_ID), Some(17));
        assert_eq!(heap.item_value(HEAP_LENGTH_ID), Some(24));
        assert_eq!(heap.item_value(0x1000), Some(5));
        assert_eq!(heap.item_value(0x1001), None);
    }

    #[test]
    fn collect_items_in_config_order() {
        let heap = Heap::new(
            3,
            vec![Item::new(0x1000, 9), Item::new(0x1001, 4)],
            vec![1, 2, 3],
        );
        let mut values = vec![Some(99)];
        collect_items(&heap, &[0x1001, 0x2000, HEAP_LENGTH_ID, 0x1000], &mut values);
        assert_eq!(values, vec![Some(4), None, Some(3), Some(9)]);

        let meta = HeapMetadata::new(heap.cnt(), heap.payload().len(), &values);
        assert_eq!(meta.item(0), Some(4));
        assert_eq!(meta.item(1), None);
        assert_eq!(meta.item(7), None);
        assert_eq!(meta.payload_len(), 3);
    }
}
