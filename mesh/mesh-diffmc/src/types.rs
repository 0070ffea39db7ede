//! Small value types shared by every stage.
//!
//! Positions and feature vectors are plain nalgebra vectors, so elementwise
//! arithmetic, scalar products and `dot` come for free. The [`Real`] trait
//! adds what nalgebra does not provide: a lock-free atomic add used when
//! several vertices scatter gradients onto the same grid sample.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bytemuck::{Pod, Zeroable};
use nalgebra::{RealField, SVector, Vector3};

use crate::tables::EDGE_CORNERS;

/// Number of components in a per-sample feature vector.
pub const FEATURE_DIM: usize = 8;

/// A point in lattice (or normalized) space.
pub type Position<T> = Vector3<T>;

/// A fixed-width attribute carried by every sample and interpolated onto
/// every output vertex.
pub type Feature<T> = SVector<T, FEATURE_DIM>;

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Floating-point scalar the engine can run on (`f32` or `f64`).
///
/// Atomic accumulation is a compare-and-swap loop over the bit pattern, so
/// concurrent adds commute up to floating-point rounding: the final sum is
/// the same set of terms, possibly associated in a different order.
pub trait Real: RealField + Copy + Pod + Send + Sync + sealed::Sealed {
    /// Atomic cell holding one value of this type.
    type Atomic: Send + Sync + std::fmt::Debug;

    /// Create an atomic cell holding `value`.
    fn new_atomic(value: Self) -> Self::Atomic;

    /// Add `value` to the cell. Safe under concurrent writers.
    fn atomic_add(cell: &Self::Atomic, value: Self);

    /// Read the current value of the cell.
    fn atomic_load(cell: &Self::Atomic) -> Self;

    /// Convert from `f64`, rounding if needed.
    fn cast_f64(value: f64) -> Self;

    /// Widen to `f64`.
    fn as_f64(self) -> f64;

    /// Convert a lattice index to a coordinate.
    #[allow(clippy::cast_precision_loss)]
    fn cast_usize(value: usize) -> Self {
        Self::cast_f64(value as f64)
    }
}

impl Real for f32 {
    type Atomic = AtomicU32;

    fn new_atomic(value: Self) -> AtomicU32 {
        AtomicU32::new(value.to_bits())
    }

    fn atomic_add(cell: &AtomicU32, value: Self) {
        // The closure always returns Some, so the update cannot fail.
        let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some((Self::from_bits(bits) + value).to_bits())
        });
    }

    fn atomic_load(cell: &AtomicU32) -> Self {
        Self::from_bits(cell.load(Ordering::Relaxed))
    }

    #[allow(clippy::cast_possible_truncation)]
    fn cast_f64(value: f64) -> Self {
        value as Self
    }

    fn as_f64(self) -> f64 {
        f64::from(self)
    }
}

impl Real for f64 {
    type Atomic = AtomicU64;

    fn new_atomic(value: Self) -> AtomicU64 {
        AtomicU64::new(value.to_bits())
    }

    fn atomic_add(cell: &AtomicU64, value: Self) {
        let _ = cell.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
            Some((Self::from_bits(bits) + value).to_bits())
        });
    }

    fn atomic_load(cell: &AtomicU64) -> Self {
        Self::from_bits(cell.load(Ordering::Relaxed))
    }

    fn cast_f64(value: f64) -> Self {
        value
    }

    fn as_f64(self) -> f64 {
        self
    }
}

/// One output triangle: three indices into the vertex array.
///
/// # Memory Layout
///
/// `#[repr(C)]`, 12 bytes, so a `&[Triangle]` can be viewed as a flat
/// `&[u32]` index buffer with [`bytemuck::cast_slice`].
///
/// # Example
///
/// ```
/// use mesh_diffmc::Triangle;
///
/// let tris = [Triangle::new(0, 1, 2), Triangle::new(2, 1, 3)];
/// let flat: &[u32] = bytemuck::cast_slice(&tris);
/// assert_eq!(flat, &[0, 1, 2, 2, 1, 3]);
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct Triangle {
    /// First vertex index.
    pub i: u32,
    /// Second vertex index.
    pub j: u32,
    /// Third vertex index.
    pub k: u32,
}

impl Triangle {
    /// Create a triangle from three vertex indices.
    #[must_use]
    pub const fn new(i: u32, j: u32, k: u32) -> Self {
        Self { i, j, k }
    }

    /// The indices as an array.
    #[must_use]
    pub const fn indices(&self) -> [u32; 3] {
        [self.i, self.j, self.k]
    }

    /// Shift every index by `offset`.
    #[must_use]
    pub const fn offset(&self, offset: u32) -> Self {
        Self::new(self.i + offset, self.j + offset, self.k + offset)
    }
}

/// Which local cube edge produced an output vertex.
///
/// Together with the vertex's owning used cell this is all the adjoint pass
/// needs to recover the two source samples without searching.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct VertexTag(pub u8);

impl VertexTag {
    /// Local edge index in `0..12`.
    #[must_use]
    pub const fn edge(self) -> usize {
        self.0 as usize
    }

    /// The two cube corners (in `0..8`) joined by this edge.
    #[must_use]
    pub const fn corners(self) -> [usize; 2] {
        EDGE_CORNERS[self.0 as usize]
    }
}
