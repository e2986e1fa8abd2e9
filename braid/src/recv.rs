//! Chunk stream group receiver.
//!
//! Several streams, each fed by its own transport, assemble heaps into a
//! single shared sequence of fixed-size chunks:
//!
//! ```text
//!  reader ─> heap queue ─> assembler ─┐
//!  reader ─> heap queue ─> assembler ─┼─> group window ─> data ring ─> consumer
//!  reader ─> heap queue ─> assembler ─┘        ^                          │
//!                                              └──────── free ring <──────┘
//! ```
//!
//! - `heap`: decoded heaps and the item metadata placement sees
//! - `place`: the placement callback mapping a heap into a chunk
//! - `chunk`: recyclable chunk buffers
//! - `config`: group and stream configuration
//! - `stream`: per-stream assembler
//! - `group`: the coordinator and its eviction policies
//! - `inproc`: in-process transport
//! - `stats`: loss and delivery counters

pub mod chunk;
pub mod config;
pub mod group;
pub mod heap;
pub mod inproc;
pub mod place;
pub mod stats;
pub mod stream;

mod window;

pub use chunk::Chunk;
pub use config::{ChunkStreamConfig, ChunkStreamGroupConfig, ConfigError, EvictionMode, Ready, StreamConfig};
pub use group::{ChunkRing, ChunkStreamRingGroup, GroupError};
pub use heap::{HEAP_CNT_ID, HEAP_LENGTH_ID, Heap, HeapMetadata, Item, ItemId};
pub use inproc::{HeapSource, InprocQueue, InprocReader};
pub use place::{LinearPlacement, Place, Placement, place_fn};
pub use stats::{GroupStats, StreamStats};
pub use stream::{ChunkStreamGroupMember, MemberState};
