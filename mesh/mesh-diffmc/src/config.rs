//! Engine configuration and presets.
//!
//! # Presets
//!
//! - [`EngineConfig::default()`] - rayon's global pool, no memory budget
//! - [`EngineConfig::single_threaded()`] - a dedicated one-thread pool
//! - [`EngineConfig::bounded()`] - cap the bytes held by engine buffers
//!
//! # Example
//!
//! ```
//! use mesh_diffmc::{CoordinateSpace, EngineConfig};
//!
//! let config = EngineConfig::bounded(64 << 20)
//!     .with_num_threads(4)
//!     .with_coordinates(CoordinateSpace::Normalized);
//!
//! assert_eq!(config.memory_limit, Some(64 << 20));
//! assert_eq!(config.num_threads, Some(4));
//! ```

/// Default work-block width for scans and block-wise output writes.
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Coordinate frame for emitted vertex positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CoordinateSpace {
    /// Positions in sample-index units: sample `(x, y, z)` sits at `(x, y, z)`.
    #[default]
    Lattice,

    /// Each axis divided by `dim - 1`, so the lattice spans the unit cube.
    Normalized,
}

/// Configuration for a [`MarchingCubes`](crate::MarchingCubes) engine.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EngineConfig {
    /// Worker threads for the parallel stages.
    ///
    /// `None` runs on rayon's global pool. `Some(n)` builds a pool of `n`
    /// threads owned by the engine.
    pub num_threads: Option<usize>,

    /// Byte budget across all engine-owned buffers. `None` is unbounded.
    pub memory_limit: Option<usize>,

    /// Items per work block in the prefix scan and in block-wise writes.
    pub block_size: usize,

    /// Frame for output positions.
    pub coordinates: CoordinateSpace,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_threads: None,
            memory_limit: None,
            block_size: DEFAULT_BLOCK_SIZE,
            coordinates: CoordinateSpace::Lattice,
        }
    }
}

impl EngineConfig {
    /// Run every stage on a dedicated single worker thread.
    ///
    /// Useful for reproducible timing and for hosts that own their threads.
    #[must_use]
    pub fn single_threaded() -> Self {
        Self {
            num_threads: Some(1),
            ..Self::default()
        }
    }

    /// Default settings with a byte budget on engine buffers.
    #[must_use]
    pub fn bounded(bytes: usize) -> Self {
        Self {
            memory_limit: Some(bytes),
            ..Self::default()
        }
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_num_threads(mut self, threads: usize) -> Self {
        self.num_threads = Some(threads);
        self
    }

    /// Set the buffer byte budget.
    #[must_use]
    pub const fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Set the work-block width. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.max(1);
        self
    }

    /// Set the output coordinate frame.
    #[must_use]
    pub const fn with_coordinates(mut self, coordinates: CoordinateSpace) -> Self {
        self.coordinates = coordinates;
        self
    }

    /// Block size actually used by the stages.
    #[must_use]
    pub fn effective_block_size(&self) -> usize {
        self.block_size.max(1)
    }
}
