//! Multi-stream chunk receiver.
//!
//! A [`ChunkStreamRingGroup`](recv::ChunkStreamRingGroup) merges several
//! concurrently received heap streams into one sequence of fixed-shape
//! chunks, delivered in strictly increasing chunk id order through a bounded
//! data ring and recycled through a free ring.

pub mod recv;
pub mod runtime;
pub mod seq;
pub mod sync;
pub mod trace;

pub use trace::init_tracing;
