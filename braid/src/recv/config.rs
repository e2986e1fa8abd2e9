//! Group and per-stream configuration values.
//!
//! All configuration types are plain immutable values validated once at
//! construction. Invalid values are rejected, never clamped.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::chunk::Chunk;
use super::heap::ItemId;
use super::place::Place;
use crate::sync::ZeroCapacity;

/// Errors raised while building configuration or pools.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `max_chunks` must be at least one.
    #[error("max_chunks must be positive")]
    ZeroMaxChunks,
    /// `max_heaps` must be at least one.
    #[error("max_heaps must be positive")]
    ZeroMaxHeaps,
    /// Ringbuffers must hold at least one item.
    #[error("ringbuffer capacity must be positive")]
    ZeroCapacity,
    /// In lossless mode a stream window wider than the group window can
    /// hold the very chunk it is waiting for.
    #[error("stream max_chunks ({stream}) exceeds group max_chunks ({group}) in lossless mode")]
    StreamWindowExceedsGroup { stream: usize, group: usize },
}

impl From<ZeroCapacity> for ConfigError {
    fn from(_: ZeroCapacity) -> Self {
        Self::ZeroCapacity
    }
}

/// What the group does when its window must advance past chunks that some
/// streams are still holding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionMode {
    /// Force lagging streams to give up incomplete chunks.
    #[default]
    Lossy,
    /// A chunk is released only once every stream has moved past it.
    Lossless,
}

impl fmt::Display for EvictionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lossy => f.write_str("lossy"),
            Self::Lossless => f.write_str("lossless"),
        }
    }
}

#[derive(Deserialize)]
struct RawGroupConfig {
    max_chunks: usize,
    #[serde(default)]
    eviction_mode: EvictionMode,
}

/// Hook run on every chunk right before it is pushed to the data ring.
///
/// Runs on whichever thread delivers the chunk, without the group lock held,
/// once per chunk and in chunk id order.
pub trait Ready: Send + Sync {
    fn ready(&self, chunk: &mut Chunk);
}

impl<F> Ready for F
where
    F: Fn(&mut Chunk) + Send + Sync,
{
    fn ready(&self, chunk: &mut Chunk) {
        self(chunk);
    }
}

/// Configuration shared by all streams of a group.
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "RawGroupConfig")]
pub struct ChunkStreamGroupConfig {
    max_chunks: usize,
    eviction_mode: EvictionMode,
    #[serde(skip)]
    ready: Option<Arc<dyn Ready>>,
}

impl ChunkStreamGroupConfig {
    /// Default number of chunks live at the same time.
    pub const DEFAULT_MAX_CHUNKS: usize = ChunkStreamConfig::DEFAULT_MAX_CHUNKS;

    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroMaxChunks`] if `max_chunks` is zero.
    pub fn new(max_chunks: usize, eviction_mode: EvictionMode) -> Result<Self, ConfigError> {
        if max_chunks == 0 {
            return Err(ConfigError::ZeroMaxChunks);
        }
        Ok(Self {
            max_chunks,
            eviction_mode,
            ready: None,
        })
    }

    /// Installs a hook that sees every chunk just before delivery, e.g. to
    /// fill in metadata derived from the `present` flags.
    #[must_use]
    pub fn with_ready(mut self, ready: impl Ready + 'static) -> Self {
        self.ready = Some(Arc::new(ready));
        self
    }

    /// Maximum number of chunks the group assembles concurrently. A value of
    /// one means heaps must arrive in chunk order.
    #[inline]
    #[must_use]
    pub const fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    #[inline]
    #[must_use]
    pub const fn eviction_mode(&self) -> EvictionMode {
        self.eviction_mode
    }

    #[must_use]
    pub fn ready(&self) -> Option<&Arc<dyn Ready>> {
        self.ready.as_ref()
    }
}

impl Default for ChunkStreamGroupConfig {
    fn default() -> Self {
        Self {
            max_chunks: Self::DEFAULT_MAX_CHUNKS,
            eviction_mode: EvictionMode::Lossy,
            ready: None,
        }
    }
}

// Hooks compare by identity.
impl PartialEq for ChunkStreamGroupConfig {
    fn eq(&self, other: &Self) -> bool {
        let same_ready = match (&self.ready, &other.ready) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        };
        self.max_chunks == other.max_chunks && self.eviction_mode == other.eviction_mode && same_ready
    }
}

impl Eq for ChunkStreamGroupConfig {}

impl fmt::Debug for ChunkStreamGroupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStreamGroupConfig")
            .field("max_chunks", &self.max_chunks)
            .field("eviction_mode", &self.eviction_mode)
            .field("ready", &self.ready.is_some())
            .finish()
    }
}

impl TryFrom<RawGroupConfig> for ChunkStreamGroupConfig {
    type Error = ConfigError;

    fn try_from(raw: RawGroupConfig) -> Result<Self, Self::Error> {
        Self::new(raw.max_chunks, raw.eviction_mode)
    }
}

#[derive(Deserialize)]
struct RawStreamConfig {
    max_heaps: usize,
}

/// Transport-facing settings of one stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStreamConfig")]
pub struct StreamConfig {
    max_heaps: usize,
}

impl StreamConfig {
    /// Default number of decoded heaps buffered ahead of the assembler.
    pub const DEFAULT_MAX_HEAPS: usize = 4;

    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroMaxHeaps`] if `max_heaps` is zero.
    pub const fn new(max_heaps: usize) -> Result<Self, ConfigError> {
        if max_heaps == 0 {
            return Err(ConfigError::ZeroMaxHeaps);
        }
        Ok(Self { max_heaps })
    }

    /// Capacity of the queue between the readers and the assembler.
    #[inline]
    #[must_use]
    pub const fn max_heaps(&self) -> usize {
        self.max_heaps
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_heaps: Self::DEFAULT_MAX_HEAPS,
        }
    }
}

impl TryFrom<RawStreamConfig> for StreamConfig {
    type Error = ConfigError;

    fn try_from(raw: RawStreamConfig) -> Result<Self, Self::Error> {
        Self::new(raw.max_heaps)
    }
}

/// Chunking settings of one stream: its window and placement callback.
#[derive(Clone)]
pub struct ChunkStreamConfig {
    items: Vec<ItemId>,
    max_chunks: usize,
    place: Arc<dyn Place>,
}

impl ChunkStreamConfig {
    /// Default per-stream window.
    pub const DEFAULT_MAX_CHUNKS: usize = 2;

    /// Builds a config with the default window and no items.
    pub fn new(place: impl Place + 'static) -> Self {
        Self {
            items: Vec::new(),
            max_chunks: Self::DEFAULT_MAX_CHUNKS,
            place: Arc::new(place),
        }
    }

    /// Item ids whose values are passed to the placement callback, in order.
    #[must_use]
    pub fn with_items(mut self, items: impl IntoIterator<Item = ItemId>) -> Self {
        self.items = items.into_iter().collect();
        self
    }

    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroMaxChunks`] if `max_chunks` is zero.
    pub fn with_max_chunks(mut self, max_chunks: usize) -> Result<Self, ConfigError> {
        if max_chunks == 0 {
            return Err(ConfigError::ZeroMaxChunks);
        }
        self.max_chunks = max_chunks;
        Ok(self)
    }

    #[must_use]
    pub fn items(&self) -> &[ItemId] {
        &self.items
    }

    #[inline]
    #[must_use]
    pub const fn max_chunks(&self) -> usize {
        self.max_chunks
    }

    #[must_use]
    pub fn place(&self) -> &Arc<dyn Place> {
        &self.place
    }
}

impl fmt::Debug for ChunkStreamConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStreamConfig")
            .field("items", &self.items)
            .field("max_chunks", &self.max_chunks)
            .finish_non_exhaustive()
    }
}
