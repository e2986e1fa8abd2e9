//! Heap delivery abstraction and an in-process transport.
//!
//! A stream reader pulls decoded heaps from a [`HeapSource`] until it reports
//! end-of-stream. Any `Iterator<Item = Heap>` is a source; [`InprocQueue`]
//! is an unbounded, stoppable queue for feeding streams from other threads
//! in the same process.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::heap::Heap;
use crate::sync::Stopped;

/// Source of decoded heaps for one stream reader.
pub trait HeapSource: Send + 'static {
    /// Blocks until the next heap is available. `None` means the transport
    /// has ended and no more heaps will arrive.
    fn recv(&mut self) -> Option<Heap>;
}

impl<I> HeapSource for I
where
    I: Iterator<Item = Heap> + Send + 'static,
{
    fn recv(&mut self) -> Option<Heap> {
        self.next()
    }
}

struct QueueState {
    heaps: VecDeque<Heap>,
    stopped: bool,
}

/// Unbounded in-process heap queue.
///
/// Producers call [`add_heap`](Self::add_heap); readers created with
/// [`reader`](Self::reader) drain it. After [`stop`](Self::stop), readers
/// drain whatever is queued and then report end-of-stream.
pub struct InprocQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl InprocQueue {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState {
                heaps: VecDeque::new(),
                stopped: false,
            }),
            ready: Condvar::new(),
        })
    }

    /// Queues a heap.
    ///
    /// # Errors
    ///
    /// Returns [`Stopped`] if the queue was stopped.
    pub fn add_heap(&self, heap: Heap) -> Result<(), Stopped> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(Stopped);
        }
        state.heaps.push_back(heap);
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Ends the transport. Idempotent.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
        self.ready.notify_all();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().heaps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().heaps.is_empty()
    }

    /// A [`HeapSource`] reading from this queue.
    #[must_use]
    pub fn reader(self: &Arc<Self>) -> InprocReader {
        InprocReader {
            queue: Arc::clone(self),
        }
    }

    fn pop(&self) -> Option<Heap> {
        let mut state = self.state.lock();
        loop {
            if let Some(heap) = state.heaps.pop_front() {
                return Some(heap);
            }
            if state.stopped {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }
}

/// Reading end of an [`InprocQueue`].
pub struct InprocReader {
    queue: Arc<InprocQueue>,
}

impl Iterator for InprocReader {
    type Item = Heap;

    fn next(&mut self) -> Option<Heap> {
        self.queue.pop()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use super::*;

    fn heap(cnt: u64) -> Heap {
        Heap::new(cnt, Vec::new(), Vec::new())
    }

    #[test]
    fn reader_drains_then_ends() {
        let queue = InprocQueue::new();
        queue.add_heap(heap(1)).unwrap();
        queue.add_heap(heap(2)).unwrap();
        queue.stop();
        assert_eq!(queue.add_heap(heap(3)), Err(Stopped));

        let mut reader = queue.reader();
        assert_eq!(reader.recv().map(|h| h.cnt()), Some(1));
        assert_eq!(reader.recv().map(|h| h.cnt()), Some(2));
        assert!(reader.recv().is_none());
    }

    #[test]
    fn reader_blocks_until_heap_arrives() {
        let queue = InprocQueue::new();
        let mut reader = queue.reader();
        let handle = thread::spawn(move || reader.recv().map(|h| h.cnt()));

        thread::sleep(Duration::from_millis(20));
        queue.add_heap(heap(42)).unwrap();
        assert_eq!(handle.join().unwrap(), Some(42));
    }

    #[test]
    fn iterators_are_sources() {
        let mut source = vec![heap(5), heap(6)].into_iter();
        assert_eq!(HeapSource::recv(&mut source).map(|h| h.cnt()), Some(5));
        assert_eq!(HeapSource::recv(&mut source).map(|h| h.cnt()), Some(6));
        assert!(HeapSource::recv(&mut source).is_none());
    }
}
