//! Blocking bounded FIFO with an explicit stop signal.
//!
//! # Overview
//!
//! - [`Ringbuffer::put`] blocks while the ring is full
//! - [`Ringbuffer::get`] blocks while the ring is empty
//! - [`Ringbuffer::stop`] wakes every blocked caller. Producers fail fast from
//!   then on, consumers drain what is left and then see [`Stopped`]
//!
//! The same type backs the free-chunk pool, the finished-chunk output and the
//! per-stream heap queue. Instances share no state with each other.
//!
//! # Example
//!
//! ```
//! use braid::sync::Ringbuffer;
//!
//! let ring = Ringbuffer::new(4).unwrap();
//! ring.put(1u32).unwrap();
//! ring.put(2u32).unwrap();
//! ring.stop();
//!
//! // Items queued before the stop are still delivered.
//! assert_eq!(ring.iter().collect::<Vec<_>>(), vec![1, 2]);
//! assert!(ring.get().is_err());
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use thiserror::Error;

/// A ring was asked to hold no items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ringbuffer capacity must be positive")]
pub struct ZeroCapacity;

/// Terminal condition: the ring was stopped and every queued item consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("ringbuffer stopped")]
pub struct Stopped;

/// Error returned by the producer side. The rejected item is handed back.
#[derive(PartialEq, Eq, Error)]
pub enum PushError<T> {
    /// The ring has been stopped; no further items are accepted.
    #[error("ringbuffer stopped")]
    Stopped(T),
    /// The ring is at capacity (non-blocking puts only).
    #[error("ringbuffer full")]
    Full(T),
}

impl<T> PushError<T> {
    /// Recovers the item that could not be queued.
    #[must_use]
    pub fn into_inner(self) -> T {
        match self {
            Self::Stopped(item) | Self::Full(item) => item,
        }
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped(_) => f.write_str("Stopped(..)"),
            Self::Full(_) => f.write_str("Full(..)"),
        }
    }
}

/// Error returned by the non-blocking and timed consumer calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PopError {
    /// Nothing queued right now (or the wait timed out).
    #[error("ringbuffer empty")]
    Empty,
    /// Stopped and drained.
    #[error("ringbuffer stopped")]
    Stopped,
}

impl From<Stopped> for PopError {
    fn from(_: Stopped) -> Self {
        Self::Stopped
    }
}

struct State<T> {
    items: VecDeque<T>,
    stopped: bool,
    producers: usize,
}

/// Bounded blocking FIFO shared by reference (usually behind an `Arc`).
pub struct Ringbuffer<T> {
    state: Mutex<State<T>>,
    /// Signalled when an item is queued or the ring stops.
    data_available: Condvar,
    /// Signalled when an item is removed or the ring stops.
    space_available: Condvar,
    capacity: usize,
}

impl<T> Ringbuffer<T> {
    /// Creates an empty ring holding at most `capacity` items.
    ///
    /// # Errors
    ///
    /// Returns [`ZeroCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, ZeroCapacity> {
        if capacity == 0 {
            return Err(ZeroCapacity);
        }
        Ok(Self {
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                stopped: false,
                producers: 0,
            }),
            data_available: Condvar::new(),
            space_available: Condvar::new(),
            capacity,
        })
    }

    /// Maximum number of queued items.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of currently queued items.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }

    /// Returns true if a `put` would block right now.
    #[must_use]
    pub fn full(&self) -> bool {
        self.state.lock().items.len() >= self.capacity
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Queues `item`, blocking while the ring is full.
    ///
    /// # Errors
    ///
    /// Returns `PushError::Stopped(item)` if the ring is stopped before or
    /// while waiting for space.
    pub fn put(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        loop {
            if state.stopped {
                return Err(PushError::Stopped(item));
            }
            if state.items.len() < self.capacity {
                break;
            }
            self.space_available.wait(&mut state);
        }
        state.items.push_back(item);
        drop(state);
        self.data_available.notify_one();
        Ok(())
    }

    /// Queues `item` without blocking.
    ///
    /// # Errors
    ///
    /// Returns `PushError::Full(item)` when at capacity and
    /// `PushError::Stopped(item)` once stopped.
    pub fn try_put(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.state.lock();
        if state.stopped {
            return Err(PushError::Stopped(item));
        }
        if state.items.len() >= self.capacity {
            return Err(PushError::Full(item));
        }
        state.items.push_back(item);
        drop(state);
        self.data_available.notify_one();
        Ok(())
    }

    /// Dequeues the oldest item, blocking while the ring is empty.
    ///
    /// # Errors
    ///
    /// Returns [`Stopped`] once the ring is stopped and drained.
    pub fn get(&self) -> Result<T, Stopped> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.space_available.notify_one();
                return Ok(item);
            }
            if state.stopped {
                return Err(Stopped);
            }
            self.data_available.wait(&mut state);
        }
    }

    /// Dequeues the oldest item without blocking.
    ///
    /// # Errors
    ///
    /// [`PopError::Empty`] if nothing is queued, [`PopError::Stopped`] if
    /// stopped and drained.
    pub fn try_get(&self) -> Result<T, PopError> {
        let mut state = self.state.lock();
        match state.items.pop_front() {
            Some(item) => {
                drop(state);
                self.space_available.notify_one();
                Ok(item)
            }
            None if state.stopped => Err(PopError::Stopped),
            None => Err(PopError::Empty),
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout`.
    ///
    /// # Errors
    ///
    /// [`PopError::Empty`] on timeout, [`PopError::Stopped`] if stopped and
    /// drained.
    pub fn get_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.space_available.notify_one();
                return Ok(item);
            }
            if state.stopped {
                return Err(PopError::Stopped);
            }
            if self
                .data_available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return match state.items.pop_front() {
                    Some(item) => {
                        drop(state);
                        self.space_available.notify_one();
                        Ok(item)
                    }
                    None if state.stopped => Err(PopError::Stopped),
                    None => Err(PopError::Empty),
                };
            }
        }
    }

    /// Stops the ring and wakes every blocked caller. Idempotent.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn stop(&self) -> bool {
        let mut state = self.state.lock();
        if state.stopped {
            return false;
        }
        state.stopped = true;
        drop(state);
        self.data_available.notify_all();
        self.space_available.notify_all();
        true
    }

    /// Registers a producer. See [`remove_producer`](Self::remove_producer).
    pub fn add_producer(&self) {
        self.state.lock().producers += 1;
    }

    /// Unregisters a producer; the ring stops when the last one leaves.
    ///
    /// Returns `true` if this call stopped the ring.
    pub fn remove_producer(&self) -> bool {
        let mut state = self.state.lock();
        debug_assert!(state.producers > 0, "remove_producer without add_producer");
        state.producers = state.producers.saturating_sub(1);
        if state.producers == 0 && !state.stopped {
            state.stopped = true;
            drop(state);
            self.data_available.notify_all();
            self.space_available.notify_all();
            return true;
        }
        false
    }

    /// Blocking iterator: yields items until the ring is stopped and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { ring: self }
    }
}

impl<T> fmt::Debug for Ringbuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Ringbuffer")
            .field("len", &state.items.len())
            .field("capacity", &self.capacity)
            .field("stopped", &state.stopped)
            .field("producers", &state.producers)
            .finish()
    }
}

/// Iterator returned by [`Ringbuffer::iter`].
pub struct Iter<'a, T> {
    ring: &'a Ringbuffer<T>,
}

impl<T> Iterator for Iter<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.ring.get().ok()
    }
}

impl<'a, T> IntoIterator for &'a Ringbuffer<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn zero_capacity_rejected() {
        assert_eq!(Ringbuffer::<u32>::new(0).map(|r| r.capacity()), Err(ZeroCapacity));
        assert_eq!(Ringbuffer::<u32>::new(1).map(|r| r.capacity()), Ok(1));
    }

    #[test]
    fn fifo_order() {
        let ring = Ringbuffer::new(8).unwrap();
        for i in 0..5u32 {
            ring.put(i).unwrap();
        }
        for i in 0..5u32 {
            assert_eq!(ring.get(), Ok(i));
        }
        assert_eq!(ring.try_get(), Err(PopError::Empty));
    }

    #[test]
    fn try_put_reports_full() {
        let ring = Ringbuffer::new(2).unwrap();
        ring.try_put(1).unwrap();
        ring.try_put(2).unwrap();
        assert!(ring.full());
        assert_eq!(ring.try_put(3), Err(PushError::Full(3)));

        assert_eq!(ring.get(), Ok(1));
        assert!(!ring.full());
        ring.try_put(3).unwrap();
    }

    #[test]
    fn put_after_stop_fails_fast() {
        let ring = Ringbuffer::new(2).unwrap();
        assert!(ring.stop());
        assert!(!ring.stop());
        assert_eq!(ring.put(7), Err(PushError::Stopped(7)));
        assert_eq!(ring.try_put(8).map_err(PushError::into_inner), Err(8));
    }

    #[test]
    fn get_drains_before_stopped() {
        let ring = Ringbuffer::new(4).unwrap();
        ring.put("a").unwrap();
        ring.put("b").unwrap();
        ring.stop();

        assert_eq!(ring.get(), Ok("a"));
        assert_eq!(ring.try_get(), Ok("b"));
        assert_eq!(ring.get(), Err(Stopped));
        assert_eq!(ring.try_get(), Err(PopError::Stopped));
    }

    #[test]
    fn stop_wakes_blocked_get() {
        let ring = Arc::new(Ringbuffer::<u64>::new(1).unwrap());
        let consumer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.get())
        };
        thread::sleep(Duration::from_millis(20));
        ring.stop();
        assert_eq!(consumer.join().unwrap(), Err(Stopped));
    }

    #[test]
    fn stop_wakes_blocked_put() {
        let ring = Arc::new(Ringbuffer::new(1).unwrap());
        ring.put(1u64).unwrap();
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.put(2))
        };
        thread::sleep(Duration::from_millis(20));
        ring.stop();
        assert_eq!(producer.join().unwrap(), Err(PushError::Stopped(2)));
        // The item queued before the stop is still there.
        assert_eq!(ring.get(), Ok(1));
    }

    #[test]
    fn blocked_put_resumes_when_space_frees() {
        let ring = Arc::new(Ringbuffer::new(1).unwrap());
        ring.put(1u64).unwrap();
        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || ring.put(2))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(ring.get(), Ok(1));
        producer.join().unwrap().unwrap();
        assert_eq!(ring.get(), Ok(2));
    }

    #[test]
    fn get_timeout_expires() {
        let ring = Ringbuffer::<u8>::new(1).unwrap();
        assert_eq!(
            ring.get_timeout(Duration::from_millis(10)),
            Err(PopError::Empty)
        );
        ring.put(5).unwrap();
        assert_eq!(ring.get_timeout(Duration::from_millis(10)), Ok(5));
    }

    #[test]
    fn last_producer_stops_ring() {
        let ring = Ringbuffer::new(4).unwrap();
        ring.add_producer();
        ring.add_producer();
        ring.put(1u32).unwrap();

        assert!(!ring.remove_producer());
        assert!(!ring.is_stopped());
        assert!(ring.remove_producer());
        assert!(ring.is_stopped());
        assert_eq!(ring.iter().collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn concurrent_put_get_preserves_order() {
        let ring = Arc::new(Ringbuffer::new(4).unwrap());
        let count = 1000u64;

        let producer = {
            let ring = Arc::clone(&ring);
            thread::spawn(move || {
                for i in 0..count {
                    ring.put(i).unwrap();
                }
                ring.stop();
            })
        };

        let received: Vec<u64> = ring.iter().collect();
        producer.join().unwrap();

        assert_eq!(received.len() as u64, count);
        for (i, &val) in received.iter().enumerate() {
            assert_eq!(val, i as u64);
        }
    }
}
