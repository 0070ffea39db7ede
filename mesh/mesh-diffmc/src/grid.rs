//! Owned scalar and feature grids.

use crate::error::{DiffMcError, DiffMcResult};
use crate::index::GridIndexer;
use crate::types::{Feature, Real};

/// A lattice of scalar samples, each carrying a feature vector.
///
/// Stored with `z` varying fastest, matching [`GridIndexer`], so
/// [`scalars`](Self::scalars) and [`features`](Self::features) can be handed
/// straight to [`MarchingCubes::forward`](crate::MarchingCubes::forward).
///
/// # Example
///
/// ```
/// use mesh_diffmc::FieldGrid;
///
/// // Distance from the lattice center.
/// let grid = FieldGrid::<f64>::from_fn([5, 5, 5], |x, y, z| {
///     let d = [x as f64 - 2.0, y as f64 - 2.0, z as f64 - 2.0];
///     (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
/// })
/// .unwrap();
///
/// assert_eq!(grid.get(2, 2, 2), 0.0);
/// assert_eq!(grid.scalars().len(), 125);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FieldGrid<T: Real> {
    indexer: GridIndexer,
    scalars: Vec<T>,
    features: Vec<Feature<T>>,
}

impl<T: Real> FieldGrid<T> {
    /// Create a grid of zero scalars and zero features.
    ///
    /// # Errors
    ///
    /// Returns [`DiffMcError::InvalidDimensions`] for dimensions the engine
    /// cannot extract from.
    pub fn new(dims: [usize; 3]) -> DiffMcResult<Self> {
        let indexer = GridIndexer::new(dims)?;
        let n = indexer.sample_count();
        Ok(Self {
            indexer,
            scalars: vec![T::zero(); n],
            features: vec![Feature::zeros(); n],
        })
    }

    /// Create a grid by sampling `f(x, y, z)` at every lattice point.
    /// Features start at zero.
    ///
    /// # Errors
    ///
    /// Returns [`DiffMcError::InvalidDimensions`] for invalid dimensions.
    pub fn from_fn<F>(dims: [usize; 3], f: F) -> DiffMcResult<Self>
    where
        F: Fn(usize, usize, usize) -> T,
    {
        let mut grid = Self::new(dims)?;
        for (id, value) in grid.scalars.iter_mut().enumerate() {
            let [x, y, z] = grid.indexer.coords(id);
            *value = f(x, y, z);
        }
        Ok(grid)
    }

    /// Wrap existing sample arrays.
    ///
    /// # Errors
    ///
    /// Returns [`DiffMcError::InvalidDimensions`] for invalid dimensions, or
    /// [`DiffMcError::GridSizeMismatch`] if either array has the wrong length.
    pub fn from_parts(
        dims: [usize; 3],
        scalars: Vec<T>,
        features: Vec<Feature<T>>,
    ) -> DiffMcResult<Self> {
        let indexer = GridIndexer::new(dims)?;
        let n = indexer.sample_count();
        if scalars.len() != n {
            return Err(DiffMcError::GridSizeMismatch {
                what: "scalar grid",
                expected: n,
                actual: scalars.len(),
            });
        }
        if features.len() != n {
            return Err(DiffMcError::GridSizeMismatch {
                what: "feature grid",
                expected: n,
                actual: features.len(),
            });
        }
        Ok(Self {
            indexer,
            scalars,
            features,
        })
    }

    /// Fill features by sampling `f(x, y, z)` at every lattice point.
    #[must_use]
    pub fn with_features_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, usize, usize) -> Feature<T>,
    {
        for (id, feature) in self.features.iter_mut().enumerate() {
            let [x, y, z] = self.indexer.coords(id);
            *feature = f(x, y, z);
        }
        self
    }

    /// Sample dimensions [x, y, z].
    #[must_use]
    pub const fn dims(&self) -> [usize; 3] {
        self.indexer.dims()
    }

    /// Addressing for this grid.
    #[must_use]
    pub const fn indexer(&self) -> GridIndexer {
        self.indexer
    }

    /// Scalar at `(x, y, z)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the grid.
    #[must_use]
    pub fn get(&self, x: usize, y: usize, z: usize) -> T {
        self.scalars[self.index(x, y, z)]
    }

    /// Set the scalar at `(x, y, z)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the grid.
    pub fn set(&mut self, x: usize, y: usize, z: usize, value: T) {
        let id = self.index(x, y, z);
        self.scalars[id] = value;
    }

    /// Feature at `(x, y, z)`.
    ///
    /// # Panics
    ///
    /// Panics if the coordinates are outside the grid.
    #[must_use]
    pub fn feature(&self, x: usize, y: usize, z: usize) -> &Feature<T> {
        &self.features[self.index(x, y, z)]
    }

    /// All scalars in linear-id order.
    #[must_use]
    pub fn scalars(&self) -> &[T] {
        &self.scalars
    }

    /// All scalars, mutably.
    pub fn scalars_mut(&mut self) -> &mut [T] {
        &mut self.scalars
    }

    /// All features in linear-id order.
    #[must_use]
    pub fn features(&self) -> &[Feature<T>] {
        &self.features
    }

    /// All features, mutably.
    pub fn features_mut(&mut self) -> &mut [Feature<T>] {
        &mut self.features
    }

    fn index(&self, x: usize, y: usize, z: usize) -> usize {
        let [nx, ny, nz] = self.dims();
        assert!(
            x < nx && y < ny && z < nz,
            "({x}, {y}, {z}) outside grid {nx}x{ny}x{nz}"
        );
        self.indexer.linear_id(x, y, z)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn test_new_zeroed() {
        let grid = FieldGrid::<f32>::new([2, 3, 4]).unwrap();
        assert_eq!(grid.dims(), [2, 3, 4]);
        assert_eq!(grid.scalars().len(), 24);
        assert!(grid.scalars().iter().all(|&s| s == 0.0));
        assert_eq!(grid.features().len(), 24);
    }

    #[test]
    fn test_invalid_dims() {
        assert!(FieldGrid::<f64>::new([0, 3, 3]).is_err());
    }

    #[test]
    fn test_from_fn_layout() {
        #[allow(clippy::cast_precision_loss)]
        let grid = FieldGrid::<f64>::from_fn([2, 3, 4], |x, y, z| (100 * x + 10 * y + z) as f64)
            .unwrap();
        assert_eq!(grid.get(1, 2, 3), 123.0);
        // z varies fastest in storage.
        assert_eq!(grid.scalars()[1], 1.0);
        assert_eq!(grid.scalars()[4], 10.0);
    }

    #[test]
    fn test_set_get() {
        let mut grid = FieldGrid::<f64>::new([3, 3, 3]).unwrap();
        grid.set(2, 1, 0, -4.5);
        assert_eq!(grid.get(2, 1, 0), -4.5);
        assert_eq!(grid.scalars()[grid.indexer().linear_id(2, 1, 0)], -4.5);
    }

    #[test]
    fn test_with_features_fn() {
        #[allow(clippy::cast_precision_loss)]
        let grid = FieldGrid::<f64>::new([2, 2, 2])
            .unwrap()
            .with_features_fn(|x, y, z| Feature::from_element((x + y + z) as f64));
        assert_eq!(grid.feature(1, 1, 1)[5], 3.0);
        assert_eq!(grid.feature(0, 0, 0)[0], 0.0);
    }

    #[test]
    fn test_from_parts_length_checked() {
        let err = FieldGrid::<f64>::from_parts([2, 2, 2], vec![0.0; 7], vec![Feature::zeros(); 8]);
        assert!(matches!(
            err,
            Err(DiffMcError::GridSizeMismatch {
                what: "scalar grid",
                ..
            })
        ));
        let ok = FieldGrid::<f64>::from_parts([2, 2, 2], vec![0.0; 8], vec![Feature::zeros(); 8]);
        assert!(ok.is_ok());
    }

    #[test]
    #[should_panic(expected = "outside grid")]
    fn test_get_out_of_bounds() {
        let grid = FieldGrid::<f64>::new([2, 2, 2]).unwrap();
        let _ = grid.get(2, 0, 0);
    }
}
