//! Error types for isosurface extraction and its adjoint.
//!
//! Dimension and allocation failures abort the whole invocation before any
//! output is published. Degenerate edges are not errors; they are handled
//! in place and counted in [`ExtractionStats`](crate::ExtractionStats).

use thiserror::Error;

/// Errors that can occur during a forward or backward pass.
///
/// # Example
///
/// ```
/// use mesh_diffmc::{DiffMcError, DiffMcResult};
///
/// fn check_dims(dims: [usize; 3]) -> DiffMcResult<()> {
///     if dims.iter().any(|&d| d < 2) {
///         return Err(DiffMcError::InvalidDimensions { dims });
///     }
///     Ok(())
/// }
///
/// assert!(check_dims([1, 4, 4]).is_err());
/// ```
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiffMcError {
    /// Lattice dimensions cannot hold a single cell.
    ///
    /// Every axis needs at least two samples, and the total sample count
    /// must fit in the index range.
    #[error("invalid lattice dimensions {dims:?}: every axis needs at least 2 samples")]
    InvalidDimensions {
        /// Requested sample dimensions [x, y, z].
        dims: [usize; 3],
    },

    /// A backward pass was requested before any forward pass.
    #[error("lattice dimensions not set: run forward before backward")]
    DimensionsNotSet,

    /// The isovalue is NaN or infinite.
    #[error("isovalue is not finite: {0}")]
    NonFiniteIsovalue(f64),

    /// A scalar sample is NaN or infinite.
    #[error("scalar sample {sample} is not finite: {value}")]
    NonFiniteSample {
        /// Linear id of the first offending sample.
        sample: usize,
        /// Its value.
        value: f64,
    },

    /// An input slice does not have the length the lattice or the cached
    /// forward output requires.
    #[error("{what} has {actual} entries, expected {expected}")]
    GridSizeMismatch {
        /// Which input was rejected.
        what: &'static str,
        /// Required number of entries.
        expected: usize,
        /// Number of entries provided.
        actual: usize,
    },

    /// Growing a buffer would exceed the configured memory budget.
    #[error("out of memory growing {buffer}: required {required} bytes, available {available} bytes")]
    OutOfMemory {
        /// Buffer being grown.
        buffer: &'static str,
        /// Total bytes the pool would hold after growing.
        required: usize,
        /// Configured budget in bytes.
        available: usize,
    },

    /// The allocator refused to grow a buffer.
    #[error("allocation failed for {buffer}: {requested} elements")]
    AllocationFailed {
        /// Buffer being grown.
        buffer: &'static str,
        /// Requested element count.
        requested: usize,
    },

    /// Output totals do not fit in `u32` mesh indices.
    #[error("{what} count {count} exceeds the u32 index range")]
    IndexOverflow {
        /// Which total overflowed.
        what: &'static str,
        /// The offending total.
        count: u64,
    },

    /// The backward grid does not reproduce the topology of the last forward.
    #[error("topology mismatch with last forward pass: {0}")]
    TopologyMismatch(String),

    /// The dedicated worker pool could not be built.
    #[error("thread pool construction failed: {0}")]
    ThreadPool(String),
}

/// Result type for extraction operations.
pub type DiffMcResult<T> = Result<T, DiffMcError>;

impl From<rayon::ThreadPoolBuildError> for DiffMcError {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Self::ThreadPool(err.to_string())
    }
}
