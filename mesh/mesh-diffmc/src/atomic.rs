//! Race-free gradient accumulation onto grid samples.
//!
//! A lattice sample is shared by up to eight cells and by every vertex on
//! its incident edges, so the adjoint pass scatters into the same sample
//! from many workers at once. Each sample owns one atomic scalar cell and
//! [`FEATURE_DIM`] atomic feature cells; additions commute up to rounding.

use crate::error::{DiffMcError, DiffMcResult};
use crate::types::{FEATURE_DIM, Feature, Real};

/// Gradients with respect to the input grids.
///
/// Same shape and ordering as the scalar and feature grids passed to
/// [`MarchingCubes::backward`](crate::MarchingCubes::backward).
#[derive(Debug, Clone, PartialEq)]
pub struct GridGradients<T: Real> {
    /// `dL/ds` for every sample.
    pub scalars: Vec<T>,
    /// `dL/df` for every sample.
    pub features: Vec<Feature<T>>,
}

impl<T: Real> GridGradients<T> {
    /// Number of samples covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scalars.len()
    }

    /// Whether the gradients cover no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
    }

    /// Whether every entry is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.scalars.iter().all(|s| *s == T::zero())
            && self.features.iter().all(|f| f.iter().all(|v| *v == T::zero()))
    }
}

/// Shared accumulator written concurrently by the adjoint stage.
#[derive(Debug)]
pub struct AtomicGradientGrid<T: Real> {
    scalars: Vec<T::Atomic>,
    // FEATURE_DIM consecutive cells per sample.
    features: Vec<T::Atomic>,
}

impl<T: Real> AtomicGradientGrid<T> {
    /// Allocate a zero-filled accumulator for `samples` grid samples.
    ///
    /// # Errors
    ///
    /// Returns [`DiffMcError::AllocationFailed`] if the allocator refuses
    /// either array.
    pub fn zeroed(samples: usize) -> DiffMcResult<Self> {
        Ok(Self {
            scalars: zeroed_cells::<T>("scalar gradients", samples)?,
            features: zeroed_cells::<T>(
                "feature gradients",
                samples.saturating_mul(FEATURE_DIM),
            )?,
        })
    }

    /// Number of samples covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scalars.len()
    }

    /// Whether the accumulator covers no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty()
    }

    /// Add `value` to the scalar gradient of `sample`.
    ///
    /// # Panics
    ///
    /// Panics if `sample` is out of range.
    #[inline]
    pub fn accumulate_scalar(&self, sample: usize, value: T) {
        T::atomic_add(&self.scalars[sample], value);
    }

    /// Add `value` componentwise to the feature gradient of `sample`.
    ///
    /// # Panics
    ///
    /// Panics if `sample` is out of range.
    #[inline]
    pub fn accumulate_feature(&self, sample: usize, value: &Feature<T>) {
        let base = sample * FEATURE_DIM;
        let cells = &self.features[base..base + FEATURE_DIM];
        for (cell, v) in cells.iter().zip(value.iter()) {
            if *v != T::zero() {
                T::atomic_add(cell, *v);
            }
        }
    }

    /// Read back the accumulated values.
    #[must_use]
    pub fn into_gradients(self) -> GridGradients<T> {
        let scalars = self.scalars.iter().map(T::atomic_load).collect();
        let features = self
            .features
            .chunks_exact(FEATURE_DIM)
            .map(|chunk| Feature::<T>::from_fn(|i, _| T::atomic_load(&chunk[i])))
            .collect();
        GridGradients { scalars, features }
    }
}

fn zeroed_cells<T: Real>(buffer: &'static str, count: usize) -> DiffMcResult<Vec<T::Atomic>> {
    let mut cells = Vec::new();
    cells
        .try_reserve_exact(count)
        .map_err(|_| DiffMcError::AllocationFailed {
            buffer,
            requested: count,
        })?;
    cells.extend((0..count).map(|_| T::new_atomic(T::zero())));
    Ok(cells)
}
