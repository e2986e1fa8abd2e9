//! Synchronization primitives for in-process communication.
//!
//! This module provides the blocking bounded queue used to recycle chunk
//! buffers and to hand finished chunks and in-flight heaps between threads.

pub mod ring;

pub use ring::{PopError, PushError, Ringbuffer, Stopped, ZeroCapacity};
