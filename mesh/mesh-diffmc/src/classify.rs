//! Stage 1: per-cell configuration codes.

use rayon::prelude::*;

use crate::index::GridIndexer;
use crate::tables;
use crate::types::{Feature, Position, Real};

/// Borrowed view of the input grids plus everything needed to place samples
/// in space. Shared by generation and the adjoint pass so both see the same
/// corners.
#[derive(Debug, Clone, Copy)]
pub struct FieldView<'a, T: Real> {
    /// Lattice addressing.
    pub grid: GridIndexer,
    /// One scalar per sample.
    pub scalars: &'a [T],
    /// One feature vector per sample.
    pub features: &'a [Feature<T>],
    /// Level set being extracted.
    pub isovalue: T,
    /// Per-axis factor from lattice index to output coordinate.
    pub scale: Position<T>,
}

impl<T: Real> FieldView<'_, T> {
    /// Output-space position of the sample with linear id `id`.
    #[inline]
    #[must_use]
    pub fn sample_position(&self, id: usize) -> Position<T> {
        let [x, y, z] = self.grid.coords(id);
        Position::new(T::cast_usize(x), T::cast_usize(y), T::cast_usize(z))
            .component_mul(&self.scale)
    }

    /// Configuration code of `cell`: bit `i` is set when corner `i` lies
    /// strictly below the isovalue. Cells on an upper face report 0.
    #[inline]
    #[must_use]
    pub fn cell_code(&self, cell: usize) -> u8 {
        if !self.grid.is_interior_cell(cell) {
            return 0;
        }
        let corners = self.grid.corner_ids(cell);
        corners
            .iter()
            .enumerate()
            .fold(0u8, |code, (bit, &sample)| {
                if self.scalars[sample] < self.isovalue {
                    code | (1 << bit)
                } else {
                    code
                }
            })
    }
}

/// Classify every cell id in `0..codes.len()`.
///
/// Writes the configuration code into `codes` and an active flag (1 when
/// the code emits geometry, else 0) into `active`, ready to be scanned.
pub fn classify_cells<T: Real>(
    field: &FieldView<'_, T>,
    codes: &mut [u8],
    active: &mut [u32],
    block_size: usize,
) {
    codes
        .par_iter_mut()
        .zip(active.par_iter_mut())
        .enumerate()
        .with_min_len(block_size)
        .for_each(|(cell, (code, flag))| {
            *code = field.cell_code(cell);
            *flag = u32::from(tables::is_active(*code));
        });
}

/// Linear id of the first NaN or infinite scalar, if any.
#[must_use]
pub fn first_non_finite_sample<T: Real>(scalars: &[T]) -> Option<usize> {
    scalars
        .par_iter()
        .position_first(|s| !s.as_f64().is_finite())
}

/// First cell whose code under `field` differs from `cached`, if any.
#[must_use]
pub fn first_code_mismatch<T: Real>(
    field: &FieldView<'_, T>,
    cached: &[u8],
) -> Option<(usize, u8, u8)> {
    cached
        .par_iter()
        .enumerate()
        .find_first(|&(cell, &code)| field.cell_code(cell) != code)
        .map(|(cell, &code)| (cell, code, field.cell_code(cell)))
}
