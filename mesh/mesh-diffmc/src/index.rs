//! Bijection between lattice coordinates and linear ids.
//!
//! Samples are stored with `z` varying fastest:
//! `id = z + dim_z * (y + dim_y * x)`. A cell is addressed by the id of its
//! minimum corner sample, so cell and sample ids share one radix. Cells whose
//! minimum corner lies on an upper face of the lattice have no far corners
//! and are never active.

use crate::error::{DiffMcError, DiffMcResult};
use crate::tables::CORNER_OFFSETS;

/// Addressing for a lattice of `dims[0] × dims[1] × dims[2]` samples.
///
/// # Example
///
/// ```
/// use mesh_diffmc::GridIndexer;
///
/// let grid = GridIndexer::new([3, 4, 5]).unwrap();
/// let id = grid.linear_id(2, 1, 3);
/// assert_eq!(grid.coords(id), [2, 1, 3]);
/// assert_eq!(grid.sample_count(), 60);
/// assert_eq!(grid.active_cell_count(), 2 * 3 * 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridIndexer {
    dims: [usize; 3],
}

impl GridIndexer {
    /// Create an indexer, validating the dimensions.
    ///
    /// # Errors
    ///
    /// Returns [`DiffMcError::InvalidDimensions`] if any axis has fewer than
    /// two samples or the sample count does not fit in a `u32` id.
    pub fn new(dims: [usize; 3]) -> DiffMcResult<Self> {
        if dims.iter().any(|&d| d < 2) {
            return Err(DiffMcError::InvalidDimensions { dims });
        }
        let total = dims[0]
            .checked_mul(dims[1])
            .and_then(|xy| xy.checked_mul(dims[2]))
            .ok_or(DiffMcError::InvalidDimensions { dims })?;
        if u32::try_from(total).is_err() {
            return Err(DiffMcError::InvalidDimensions { dims });
        }
        Ok(Self { dims })
    }

    /// Sample dimensions [x, y, z].
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Total number of samples (and of addressable cell ids).
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Number of cells that have all 8 corners inside the lattice.
    #[must_use]
    pub const fn active_cell_count(&self) -> usize {
        (self.dims[0] - 1) * (self.dims[1] - 1) * (self.dims[2] - 1)
    }

    /// Linear id of the sample (or cell) at `(x, y, z)`.
    #[inline]
    #[must_use]
    pub const fn linear_id(&self, x: usize, y: usize, z: usize) -> usize {
        z + self.dims[2] * (y + self.dims[1] * x)
    }

    /// Inverse of [`linear_id`](Self::linear_id).
    #[inline]
    #[must_use]
    pub const fn coords(&self, id: usize) -> [usize; 3] {
        let x = id / (self.dims[2] * self.dims[1]);
        let y = (id / self.dims[2]) % self.dims[1];
        let z = id % self.dims[2];
        [x, y, z]
    }

    /// Whether the cell at `id` has all of its corners inside the lattice.
    #[inline]
    #[must_use]
    pub const fn is_interior_cell(&self, id: usize) -> bool {
        let [x, y, z] = self.coords(id);
        x + 1 < self.dims[0] && y + 1 < self.dims[1] && z + 1 < self.dims[2]
    }

    /// Sample ids of the 8 corners of an interior cell, in cube-corner order.
    #[inline]
    #[must_use]
    pub fn corner_ids(&self, cell: usize) -> [usize; 8] {
        let [x, y, z] = self.coords(cell);
        CORNER_OFFSETS.map(|[dx, dy, dz]| self.linear_id(x + dx, y + dy, z + dz))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_degenerate_dims() {
        assert!(GridIndexer::new([1, 5, 5]).is_err());
        assert!(GridIndexer::new([5, 0, 5]).is_err());
        assert!(GridIndexer::new([5, 5, 1]).is_err());
        assert!(GridIndexer::new([2, 2, 2]).is_ok());
    }

    #[test]
    fn test_rejects_overflowing_dims() {
        let err = GridIndexer::new([usize::MAX, 2, 2]);
        assert!(matches!(err, Err(DiffMcError::InvalidDimensions { .. })));

        let err = GridIndexer::new([70_000, 70_000, 2]);
        assert!(matches!(err, Err(DiffMcError::InvalidDimensions { .. })));
    }

    #[test]
    fn test_linear_id_z_fastest() {
        let grid = GridIndexer::new([2, 2, 2]).unwrap();
        assert_eq!(grid.linear_id(0, 0, 0), 0);
        assert_eq!(grid.linear_id(0, 0, 1), 1);
        assert_eq!(grid.linear_id(0, 1, 0), 2);
        assert_eq!(grid.linear_id(1, 0, 0), 4);
        assert_eq!(grid.linear_id(1, 1, 1), 7);
    }

    #[test]
    fn test_bijection() {
        let grid = GridIndexer::new([3, 4, 5]).unwrap();
        for x in 0..3 {
            for y in 0..4 {
                for z in 0..5 {
                    let id = grid.linear_id(x, y, z);
                    assert!(id < grid.sample_count());
                    assert_eq!(grid.coords(id), [x, y, z]);
                }
            }
        }
    }

    #[test]
    fn test_interior_cells() {
        let grid = GridIndexer::new([3, 3, 3]).unwrap();
        let interior = (0..grid.sample_count())
            .filter(|&id| grid.is_interior_cell(id))
            .count();
        assert_eq!(interior, grid.active_cell_count());
        assert_eq!(interior, 8);
        assert!(!grid.is_interior_cell(grid.linear_id(2, 0, 0)));
    }

    #[test]
    fn test_corner_ids() {
        let grid = GridIndexer::new([2, 2, 2]).unwrap();
        let corners = grid.corner_ids(0);
        // (0,0,0) (1,0,0) (1,1,0) (0,1,0) (0,0,1) (1,0,1) (1,1,1) (0,1,1)
        assert_eq!(corners, [0, 4, 6, 2, 1, 5, 7, 3]);
    }
}
