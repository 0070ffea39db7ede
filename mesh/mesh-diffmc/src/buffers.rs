//! Engine-owned, grow-only storage for every pipeline stage.
//!
//! Each buffer category grows to the largest size any call has needed and
//! never shrinks, so repeated calls on similar grids do not reallocate. A
//! [`BufferPool`] owns all of them and enforces an optional byte budget.
//!
//! # Buffer categories
//!
//! | Category   | Contents                                              |
//! |------------|-------------------------------------------------------|
//! | temp       | per-block partial sums of the prefix scan             |
//! | cell       | configuration code and used-cell slot for every cell  |
//! | used cell  | cell id, code and first vertex/triangle per used cell |
//! | vert type  | local edge tag per output vertex                      |
//! | vert       | position and feature per output vertex                |
//! | tri        | output triangles                                      |
//!
//! Growing a buffer invalidates any slice previously taken from it.

use std::mem::size_of;

use tracing::debug;

use crate::error::{DiffMcError, DiffMcResult};
use crate::types::{Feature, Position, Real, Triangle, VertexTag};

/// A resizable array with a fixed fill value and a name for diagnostics.
#[derive(Debug, Clone)]
pub struct DeviceBuffer<T: Copy> {
    label: &'static str,
    fill: T,
    data: Vec<T>,
}

impl<T: Copy> DeviceBuffer<T> {
    /// Create an empty buffer. Growth fills new storage with `fill`.
    #[must_use]
    pub const fn new(label: &'static str, fill: T) -> Self {
        Self {
            label,
            fill,
            data: Vec::new(),
        }
    }

    /// Diagnostic name.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        self.label
    }

    /// Number of elements currently allocated.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes currently allocated.
    #[must_use]
    pub fn bytes(&self) -> usize {
        self.data.len() * size_of::<T>()
    }

    /// The whole allocation.
    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    /// The whole allocation, mutably.
    pub fn data_mut(&mut self) -> &mut [T] {
        &mut self.data
    }

    /// Make room for at least `n` elements.
    ///
    /// A no-op when `n` fits. Otherwise a new allocation of exactly `n`
    /// elements replaces the old one, which is released only once the new
    /// one exists. Previous contents are not preserved. Returns whether the
    /// buffer grew.
    ///
    /// # Errors
    ///
    /// Returns [`DiffMcError::AllocationFailed`] if the allocator refuses;
    /// the previous allocation is left intact.
    pub fn ensure_size(&mut self, n: usize) -> DiffMcResult<bool> {
        if n <= self.data.len() {
            return Ok(false);
        }
        let mut grown = Vec::new();
        grown
            .try_reserve_exact(n)
            .map_err(|_| DiffMcError::AllocationFailed {
                buffer: self.label,
                requested: n,
            })?;
        grown.resize(n, self.fill);
        debug!(
            buffer = self.label,
            old_capacity = self.data.len(),
            new_capacity = n,
            "Buffer grown"
        );
        self.data = grown;
        Ok(true)
    }
}

/// Sentinel in the cell → used-cell map for cells that emit nothing.
pub const NOT_USED: u32 = u32::MAX;

/// Capacity snapshot of one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferUsage {
    /// Buffer name.
    pub label: &'static str,
    /// Allocated elements.
    pub capacity: usize,
    /// Allocated bytes.
    pub bytes: usize,
}

/// All buffers owned by one engine, plus the byte budget.
#[derive(Debug)]
pub struct BufferPool<T: Real> {
    limit: Option<usize>,
    pub(crate) scan_partials: DeviceBuffer<u64>,
    pub(crate) cell_codes: DeviceBuffer<u8>,
    pub(crate) cell_to_used: DeviceBuffer<u32>,
    pub(crate) used_cells: DeviceBuffer<u32>,
    pub(crate) used_codes: DeviceBuffer<u8>,
    pub(crate) used_first_vert: DeviceBuffer<u32>,
    pub(crate) used_first_tri: DeviceBuffer<u32>,
    pub(crate) vert_types: DeviceBuffer<VertexTag>,
    pub(crate) positions: DeviceBuffer<Position<T>>,
    pub(crate) features: DeviceBuffer<Feature<T>>,
    pub(crate) triangles: DeviceBuffer<Triangle>,
}

impl<T: Real> BufferPool<T> {
    /// Create an empty pool. `limit` caps the total allocated bytes.
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            scan_partials: DeviceBuffer::new("scan partials", 0),
            cell_codes: DeviceBuffer::new("cell codes", 0),
            cell_to_used: DeviceBuffer::new("cell to used", NOT_USED),
            used_cells: DeviceBuffer::new("used cells", 0),
            used_codes: DeviceBuffer::new("used codes", 0),
            used_first_vert: DeviceBuffer::new("used first vertex", 0),
            used_first_tri: DeviceBuffer::new("used first triangle", 0),
            vert_types: DeviceBuffer::new("vertex types", VertexTag::default()),
            positions: DeviceBuffer::new("vertex positions", Position::zeros()),
            features: DeviceBuffer::new("vertex features", Feature::zeros()),
            triangles: DeviceBuffer::new("triangles", Triangle::default()),
        }
    }

    /// Configured byte budget.
    #[must_use]
    pub const fn memory_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Total bytes currently held by all buffers.
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.high_water_marks().iter().map(|u| u.bytes).sum()
    }

    /// Capacity of every buffer. Capacities only ever grow.
    #[must_use]
    pub fn high_water_marks(&self) -> Vec<BufferUsage> {
        fn usage<B: Copy>(b: &DeviceBuffer<B>) -> BufferUsage {
            BufferUsage {
                label: b.label(),
                capacity: b.capacity(),
                bytes: b.bytes(),
            }
        }
        vec![
            usage(&self.scan_partials),
            usage(&self.cell_codes),
            usage(&self.cell_to_used),
            usage(&self.used_cells),
            usage(&self.used_codes),
            usage(&self.used_first_vert),
            usage(&self.used_first_tri),
            usage(&self.vert_types),
            usage(&self.positions),
            usage(&self.features),
            usage(&self.triangles),
        ]
    }

    /// Room for `n` partial sums in the scan scratch area.
    ///
    /// # Errors
    ///
    /// [`DiffMcError::OutOfMemory`] over budget, or
    /// [`DiffMcError::AllocationFailed`] if the allocator refuses.
    pub fn ensure_temp_storage_size(&mut self, n: usize) -> DiffMcResult<()> {
        self.check_budget(&[(self.scan_partials.label(), extra(&self.scan_partials, n))])?;
        self.scan_partials.ensure_size(n)?;
        Ok(())
    }

    /// Room for per-cell codes and the cell → used-cell map.
    ///
    /// # Errors
    ///
    /// See [`ensure_temp_storage_size`](Self::ensure_temp_storage_size).
    pub fn ensure_cell_storage_size(&mut self, n: usize) -> DiffMcResult<()> {
        self.check_budget(&[
            (self.cell_codes.label(), extra(&self.cell_codes, n)),
            (self.cell_to_used.label(), extra(&self.cell_to_used, n)),
        ])?;
        self.cell_codes.ensure_size(n)?;
        self.cell_to_used.ensure_size(n)?;
        Ok(())
    }

    /// Room for `n` used cells: cell ids, codes and output offsets.
    ///
    /// # Errors
    ///
    /// See [`ensure_temp_storage_size`](Self::ensure_temp_storage_size).
    pub fn ensure_used_cell_storage_size(&mut self, n: usize) -> DiffMcResult<()> {
        self.check_budget(&[
            (self.used_cells.label(), extra(&self.used_cells, n)),
            (self.used_codes.label(), extra(&self.used_codes, n)),
            (self.used_first_vert.label(), extra(&self.used_first_vert, n)),
            (self.used_first_tri.label(), extra(&self.used_first_tri, n)),
        ])?;
        self.used_cells.ensure_size(n)?;
        self.used_codes.ensure_size(n)?;
        self.used_first_vert.ensure_size(n)?;
        self.used_first_tri.ensure_size(n)?;
        Ok(())
    }

    /// Room for `n` vertex tags.
    ///
    /// # Errors
    ///
    /// See [`ensure_temp_storage_size`](Self::ensure_temp_storage_size).
    pub fn ensure_vert_type_storage_size(&mut self, n: usize) -> DiffMcResult<()> {
        self.check_budget(&[(self.vert_types.label(), extra(&self.vert_types, n))])?;
        self.vert_types.ensure_size(n)?;
        Ok(())
    }

    /// Room for `n` vertex positions and features.
    ///
    /// # Errors
    ///
    /// See [`ensure_temp_storage_size`](Self::ensure_temp_storage_size).
    pub fn ensure_vert_storage_size(&mut self, n: usize) -> DiffMcResult<()> {
        self.check_budget(&[
            (self.positions.label(), extra(&self.positions, n)),
            (self.features.label(), extra(&self.features, n)),
        ])?;
        self.positions.ensure_size(n)?;
        self.features.ensure_size(n)?;
        Ok(())
    }

    /// Room for `n` triangles.
    ///
    /// # Errors
    ///
    /// See [`ensure_temp_storage_size`](Self::ensure_temp_storage_size).
    pub fn ensure_tri_storage_size(&mut self, n: usize) -> DiffMcResult<()> {
        self.check_budget(&[(self.triangles.label(), extra(&self.triangles, n))])?;
        self.triangles.ensure_size(n)?;
        Ok(())
    }

    /// Reject growth whose extra bytes would push the pool past its budget.
    fn check_budget(&self, growth: &[(&'static str, Option<usize>)]) -> DiffMcResult<()> {
        let Some(limit) = self.limit else {
            return Ok(());
        };
        let mut required = self.allocated_bytes();
        for &(buffer, bytes) in growth {
            let Some(bytes) = bytes else {
                return Err(DiffMcError::OutOfMemory {
                    buffer,
                    required: usize::MAX,
                    available: limit,
                });
            };
            required = required.saturating_add(bytes);
            if required > limit {
                return Err(DiffMcError::OutOfMemory {
                    buffer,
                    required,
                    available: limit,
                });
            }
        }
        Ok(())
    }
}

/// Extra bytes `buffer` needs to hold `n` elements, `None` on overflow.
fn extra<B: Copy>(buffer: &DeviceBuffer<B>, n: usize) -> Option<usize> {
    let needed = n.checked_mul(size_of::<B>())?;
    Some(needed.saturating_sub(buffer.bytes()))
}
