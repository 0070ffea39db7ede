//! The forward/backward engine.
//!
//! [`MarchingCubes`] runs the four stages in order, with a barrier between
//! each, on its own buffers:
//!
//! 1. classify every cell into a configuration code
//! 2. compact active cells and scan their vertex and triangle counts
//! 3. generate vertices, features, tags and triangles
//! 4. (backward only) scatter output gradients onto the grid
//!
//! The output of the last successful forward pass is cached in the engine.
//! A backward pass reuses the cached used-cell table after checking that the
//! grid it is given reproduces the same configuration codes.
//!
//! # Example
//!
//! ```
//! use mesh_diffmc::{EngineConfig, Feature, FieldGrid, MarchingCubes, Position};
//!
//! let grid = FieldGrid::<f64>::from_fn([3, 3, 3], |x, y, z| {
//!     let p = Position::new(x as f64, y as f64, z as f64) - Position::new(1.0, 1.0, 1.0);
//!     p.norm()
//! })
//! .unwrap();
//!
//! let mut mc = MarchingCubes::<f64>::new(EngineConfig::default()).unwrap();
//! let out = mc.forward(grid.scalars(), grid.features(), grid.dims(), 0.5).unwrap();
//! assert_eq!(out.counts.triangles, 8);
//!
//! let grad_pos = vec![Position::new(1.0, 1.0, 1.0); out.counts.vertices];
//! let grad_feat = vec![Feature::zeros(); out.counts.vertices];
//! let grads = mc
//!     .backward(grid.scalars(), grid.features(), &grad_pos, &grad_feat, 0.5)
//!     .unwrap();
//! assert_eq!(grads.scalars.len(), 27);
//! ```

use std::time::Instant;

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, info, warn};

use crate::adjoint::accumulate_adjoints;
use crate::atomic::{AtomicGradientGrid, GridGradients};
use crate::buffers::BufferPool;
use crate::classify::{FieldView, classify_cells, first_code_mismatch, first_non_finite_sample};
use crate::compact::{
    compact_active_cells, count_used_cell_outputs, exclusive_scan_in_place,
};
use crate::config::{CoordinateSpace, EngineConfig};
use crate::error::{DiffMcError, DiffMcResult};
use crate::generate::{GeometryOutputs, UsedCells, generate_geometry};
use crate::index::GridIndexer;
use crate::mesh::ExtractedMesh;
use crate::result::{ExtractionStats, MeshCounts};
use crate::types::{Feature, Position, Real, Triangle, VertexTag};

/// Borrowed view of the engine's current output.
///
/// Valid until the next call that mutates the engine.
#[derive(Debug, Clone, Copy)]
pub struct ForwardOutput<'a, T: Real> {
    /// Vertex positions.
    pub positions: &'a [Position<T>],
    /// Interpolated per-vertex features.
    pub features: &'a [Feature<T>],
    /// Local cube edge each vertex was generated on.
    pub vertex_tags: &'a [VertexTag],
    /// Triangles indexing into the vertex arrays.
    pub triangles: &'a [Triangle],
    /// Output sizes.
    pub counts: MeshCounts,
    grid: GridIndexer,
    used: UsedCells<'a>,
}

impl<T: Real> ForwardOutput<'_, T> {
    /// Triangles as a flat index buffer.
    #[must_use]
    pub fn indices(&self) -> &[u32] {
        bytemuck::cast_slice(self.triangles)
    }

    /// Linear id of the cell that emitted `vertex`.
    ///
    /// # Panics
    ///
    /// Panics if `vertex` is out of range.
    #[must_use]
    pub fn vertex_cell(&self, vertex: usize) -> usize {
        assert!(vertex < self.counts.vertices, "vertex {vertex} out of range");
        self.used.cells[self.used.owner_of_vertex(vertex)] as usize
    }

    /// The two sample ids joined by the lattice edge `vertex` lies on, in
    /// the order the edge was interpolated.
    ///
    /// # Panics
    ///
    /// Panics if `vertex` is out of range.
    #[must_use]
    pub fn vertex_samples(&self, vertex: usize) -> [usize; 2] {
        let corners = self.grid.corner_ids(self.vertex_cell(vertex));
        let [c0, c1] = self.vertex_tags[vertex].corners();
        [corners[c0], corners[c1]]
    }

    /// Copy the output into an owned mesh.
    #[must_use]
    pub fn to_mesh(&self) -> ExtractedMesh<T> {
        // Sample ids fit u32: the indexer rejects larger lattices.
        #[allow(clippy::cast_possible_truncation)]
        let edges = (0..self.counts.vertices)
            .map(|v| {
                let [a, b] = self.vertex_samples(v);
                [a.min(b) as u32, a.max(b) as u32]
            })
            .collect();
        ExtractedMesh {
            positions: self.positions.to_vec(),
            features: self.features.to_vec(),
            edges,
            triangles: self.triangles.to_vec(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ForwardCache<T: Real> {
    grid: GridIndexer,
    isovalue: T,
    stats: ExtractionStats,
}

/// Differentiable marching cubes over a regular lattice.
///
/// One engine owns one set of buffers; concurrent extractions need separate
/// engines.
#[derive(Debug)]
pub struct MarchingCubes<T: Real> {
    config: EngineConfig,
    thread_pool: Option<ThreadPool>,
    buffers: BufferPool<T>,
    grid: Option<GridIndexer>,
    cache: Option<ForwardCache<T>>,
}

impl<T: Real> MarchingCubes<T> {
    /// Create an engine. No buffers are allocated until the first forward.
    ///
    /// # Errors
    ///
    /// Returns [`DiffMcError::ThreadPool`] if a dedicated pool was requested
    /// and could not be built.
    pub fn new(config: EngineConfig) -> DiffMcResult<Self> {
        let thread_pool = config
            .num_threads
            .map(|threads| {
                ThreadPoolBuilder::new()
                    .num_threads(threads)
                    .thread_name(|i| format!("diffmc-{i}"))
                    .build()
            })
            .transpose()?;
        debug!(
            threads = ?config.num_threads,
            memory_limit = ?config.memory_limit,
            block_size = config.block_size,
            "Marching cubes engine created"
        );
        Ok(Self {
            buffers: BufferPool::new(config.memory_limit),
            config,
            thread_pool,
            grid: None,
            cache: None,
        })
    }

    /// Engine configuration.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Set the lattice dimensions. O(1); allocates nothing.
    ///
    /// Changing the dimensions discards the cached forward output.
    ///
    /// # Errors
    ///
    /// Returns [`DiffMcError::InvalidDimensions`] if any axis has fewer than
    /// two samples; the previous dimensions are kept.
    pub fn resize(&mut self, dims: [usize; 3]) -> DiffMcResult<()> {
        let grid = GridIndexer::new(dims)?;
        if self.grid != Some(grid) {
            self.cache = None;
        }
        self.grid = Some(grid);
        Ok(())
    }

    /// Extract the isosurface at `isovalue`.
    ///
    /// `scalars` and `features` hold one entry per sample in linear-id order.
    /// On failure nothing from this call is observable: the previous output
    /// is discarded before the pipeline runs and the new one is published
    /// only on success.
    ///
    /// # Errors
    ///
    /// - [`DiffMcError::NonFiniteIsovalue`] for a NaN or infinite isovalue
    /// - [`DiffMcError::NonFiniteSample`] if any scalar is NaN or infinite
    /// - [`DiffMcError::InvalidDimensions`] for unusable dimensions
    /// - [`DiffMcError::GridSizeMismatch`] if an input has the wrong length
    /// - [`DiffMcError::OutOfMemory`] or [`DiffMcError::AllocationFailed`]
    ///   if a buffer cannot grow
    /// - [`DiffMcError::IndexOverflow`] if the output exceeds `u32` indices
    pub fn forward(
        &mut self,
        scalars: &[T],
        features: &[Feature<T>],
        dims: [usize; 3],
        isovalue: T,
    ) -> DiffMcResult<ForwardOutput<'_, T>> {
        self.cache = None;
        let start = Instant::now();

        if !isovalue.as_f64().is_finite() {
            return Err(DiffMcError::NonFiniteIsovalue(isovalue.as_f64()));
        }
        self.resize(dims)?;
        let grid = self.grid.ok_or(DiffMcError::InvalidDimensions { dims })?;
        check_len("scalar grid", grid.sample_count(), scalars.len())?;
        check_len("feature grid", grid.sample_count(), features.len())?;

        info!(
            dims = ?dims,
            isovalue = isovalue.as_f64(),
            "Extracting isosurface"
        );

        let field = FieldView {
            grid,
            scalars,
            features,
            isovalue,
            scale: coordinate_scale(self.config.coordinates, dims),
        };
        let block = self.config.effective_block_size();
        let (counts, degenerate_edges) = run_in(self.thread_pool.as_ref(), || {
            check_finite(scalars)?;
            extract(&mut self.buffers, &field, block)
        })?;

        let stats = ExtractionStats {
            dims,
            counts,
            degenerate_edges,
            compute_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        };
        if degenerate_edges > 0 {
            debug!(degenerate_edges, "Degenerate edges placed at midpoints");
        }
        info!(
            used_cells = counts.used_cells,
            vertices = counts.vertices,
            triangles = counts.triangles,
            time_ms = stats.compute_time_ms,
            "Isosurface extraction complete"
        );

        self.cache = Some(ForwardCache {
            grid,
            isovalue,
            stats,
        });
        self.last_output().ok_or(DiffMcError::DimensionsNotSet)
    }

    /// Gradients of a loss with respect to the input grids.
    ///
    /// `grad_positions` and `grad_features` are `dL/d(position)` and
    /// `dL/d(feature)` for every vertex of the last forward output. The grids
    /// and isovalue must reproduce that output's topology.
    ///
    /// # Errors
    ///
    /// - [`DiffMcError::DimensionsNotSet`] if no dimensions were ever set
    /// - [`DiffMcError::TopologyMismatch`] if there is no cached forward
    ///   output, or the isovalue or any configuration code differs from it
    /// - [`DiffMcError::GridSizeMismatch`] if an input has the wrong length
    /// - [`DiffMcError::NonFiniteSample`] if any scalar is NaN or infinite
    /// - [`DiffMcError::AllocationFailed`] if the gradient grids cannot be
    ///   allocated
    pub fn backward(
        &mut self,
        scalars: &[T],
        features: &[Feature<T>],
        grad_positions: &[Position<T>],
        grad_features: &[Feature<T>],
        isovalue: T,
    ) -> DiffMcResult<GridGradients<T>> {
        let start = Instant::now();
        let dims_set = self.grid.ok_or(DiffMcError::DimensionsNotSet)?;
        let Some(cache) = self.cache else {
            return Err(self.reject(format!(
                "no forward output cached for dimensions {:?}",
                dims_set.dims()
            )));
        };
        let grid = cache.grid;
        let counts = cache.stats.counts;

        check_len("scalar grid", grid.sample_count(), scalars.len())?;
        check_len("feature grid", grid.sample_count(), features.len())?;
        check_len("position gradients", counts.vertices, grad_positions.len())?;
        check_len("feature gradients", counts.vertices, grad_features.len())?;
        if isovalue != cache.isovalue {
            return Err(self.reject(format!(
                "isovalue {} differs from forward isovalue {}",
                isovalue.as_f64(),
                cache.isovalue.as_f64()
            )));
        }

        info!(
            dims = ?grid.dims(),
            vertices = counts.vertices,
            "Backpropagating through isosurface"
        );

        let field = FieldView {
            grid,
            scalars,
            features,
            isovalue,
            scale: coordinate_scale(self.config.coordinates, grid.dims()),
        };
        let block = self.config.effective_block_size();
        let cells = grid.sample_count();
        let buffers = &self.buffers;
        let used = UsedCells {
            cells: &buffers.used_cells.data()[..counts.used_cells],
            codes: &buffers.used_codes.data()[..counts.used_cells],
            first_vert: &buffers.used_first_vert.data()[..counts.used_cells],
            first_tri: &buffers.used_first_tri.data()[..counts.used_cells],
        };
        let tags = &buffers.vert_types.data()[..counts.vertices];

        let result = run_in(self.thread_pool.as_ref(), || {
            if let Err(err) = check_finite(scalars) {
                return Ok(Err(err));
            }
            if let Some((cell, cached, found)) =
                first_code_mismatch(&field, &buffers.cell_codes.data()[..cells])
            {
                return Err(format!(
                    "cell {cell} has configuration {found:#04x}, forward had {cached:#04x}"
                ));
            }
            Ok(AtomicGradientGrid::zeroed(cells).map(|grads| {
                accumulate_adjoints(
                    &field,
                    &used,
                    tags,
                    grad_positions,
                    grad_features,
                    &grads,
                    block,
                );
                grads.into_gradients()
            }))
        });

        let gradients = match result {
            Ok(gradients) => gradients?,
            Err(reason) => return Err(self.reject(reason)),
        };

        info!(
            samples = cells,
            time_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Backward pass complete"
        );
        Ok(gradients)
    }

    /// Current lattice dimensions, if set.
    #[must_use]
    pub fn dims(&self) -> Option<[usize; 3]> {
        self.grid.map(|g| g.dims())
    }

    /// Sizes of the cached output; zero when nothing is cached.
    #[must_use]
    pub fn counts(&self) -> MeshCounts {
        self.cache.map(|c| c.stats.counts).unwrap_or_default()
    }

    /// The output of the last successful forward pass.
    #[must_use]
    pub fn last_output(&self) -> Option<ForwardOutput<'_, T>> {
        let cache = self.cache.as_ref()?;
        let MeshCounts {
            used_cells,
            vertices,
            triangles,
        } = cache.stats.counts;
        let b = &self.buffers;
        Some(ForwardOutput {
            positions: &b.positions.data()[..vertices],
            features: &b.features.data()[..vertices],
            vertex_tags: &b.vert_types.data()[..vertices],
            triangles: &b.triangles.data()[..triangles],
            counts: cache.stats.counts,
            grid: cache.grid,
            used: UsedCells {
                cells: &b.used_cells.data()[..used_cells],
                codes: &b.used_codes.data()[..used_cells],
                first_vert: &b.used_first_vert.data()[..used_cells],
                first_tri: &b.used_first_tri.data()[..used_cells],
            },
        })
    }

    /// Cached vertex positions; empty when nothing is cached.
    #[must_use]
    pub fn positions(&self) -> &[Position<T>] {
        self.last_output().map(|o| o.positions).unwrap_or_default()
    }

    /// Cached vertex features; empty when nothing is cached.
    #[must_use]
    pub fn features(&self) -> &[Feature<T>] {
        self.last_output().map(|o| o.features).unwrap_or_default()
    }

    /// Cached vertex tags; empty when nothing is cached.
    #[must_use]
    pub fn vertex_tags(&self) -> &[VertexTag] {
        self.last_output().map(|o| o.vertex_tags).unwrap_or_default()
    }

    /// Cached triangles; empty when nothing is cached.
    #[must_use]
    pub fn triangles(&self) -> &[Triangle] {
        self.last_output().map(|o| o.triangles).unwrap_or_default()
    }

    /// Statistics of the last successful forward pass.
    #[must_use]
    pub fn last_stats(&self) -> Option<&ExtractionStats> {
        self.cache.as_ref().map(|c| &c.stats)
    }

    /// Engine-owned buffers and their high-water marks.
    #[must_use]
    pub const fn buffers(&self) -> &BufferPool<T> {
        &self.buffers
    }

    fn reject(&self, reason: String) -> DiffMcError {
        warn!(dims = ?self.dims(), reason = %reason, "Backward pass rejected");
        DiffMcError::TopologyMismatch(reason)
    }
}

/// Run the pipeline up to and including generation.
fn extract<T: Real>(
    buffers: &mut BufferPool<T>,
    field: &FieldView<'_, T>,
    block: usize,
) -> DiffMcResult<(MeshCounts, usize)> {
    let cells = field.grid.sample_count();
    buffers.ensure_cell_storage_size(cells)?;
    buffers.ensure_temp_storage_size(cells.div_ceil(block))?;

    classify_cells(
        field,
        &mut buffers.cell_codes.data_mut()[..cells],
        &mut buffers.cell_to_used.data_mut()[..cells],
        block,
    );
    let used = exclusive_scan_in_place(
        &mut buffers.cell_to_used.data_mut()[..cells],
        buffers.scan_partials.data_mut(),
        block,
        "used cell",
    )? as usize;
    debug!(cells, used_cells = used, "Cells classified");

    buffers.ensure_used_cell_storage_size(used)?;
    compact_active_cells(
        &buffers.cell_codes.data()[..cells],
        &mut buffers.cell_to_used.data_mut()[..cells],
        buffers.scan_partials.data(),
        block,
        &mut buffers.used_cells.data_mut()[..used],
        &mut buffers.used_codes.data_mut()[..used],
    );
    count_used_cell_outputs(
        &buffers.used_codes.data()[..used],
        &mut buffers.used_first_vert.data_mut()[..used],
        &mut buffers.used_first_tri.data_mut()[..used],
    );
    let vertices = exclusive_scan_in_place(
        &mut buffers.used_first_vert.data_mut()[..used],
        buffers.scan_partials.data_mut(),
        block,
        "vertex",
    )? as usize;
    let triangles = exclusive_scan_in_place(
        &mut buffers.used_first_tri.data_mut()[..used],
        buffers.scan_partials.data_mut(),
        block,
        "triangle",
    )? as usize;
    debug!(vertices, triangles, "Active cells compacted");

    buffers.ensure_vert_type_storage_size(vertices)?;
    buffers.ensure_vert_storage_size(vertices)?;
    buffers.ensure_tri_storage_size(triangles)?;

    let degenerate = generate_geometry(
        field,
        &UsedCells {
            cells: &buffers.used_cells.data()[..used],
            codes: &buffers.used_codes.data()[..used],
            first_vert: &buffers.used_first_vert.data()[..used],
            first_tri: &buffers.used_first_tri.data()[..used],
        },
        GeometryOutputs {
            positions: &mut buffers.positions.data_mut()[..vertices],
            features: &mut buffers.features.data_mut()[..vertices],
            tags: &mut buffers.vert_types.data_mut()[..vertices],
            triangles: &mut buffers.triangles.data_mut()[..triangles],
        },
        block,
    );
    debug!(degenerate, "Geometry generated");

    Ok((
        MeshCounts {
            used_cells: used,
            vertices,
            triangles,
        },
        degenerate,
    ))
}

/// Run `op` on the engine's pool, or on the caller's when there is none.
fn run_in<R: Send>(pool: Option<&ThreadPool>, op: impl FnOnce() -> R + Send) -> R {
    match pool {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

fn check_finite<T: Real>(scalars: &[T]) -> DiffMcResult<()> {
    match first_non_finite_sample(scalars) {
        Some(sample) => Err(DiffMcError::NonFiniteSample {
            sample,
            value: scalars[sample].as_f64(),
        }),
        None => Ok(()),
    }
}

fn check_len(what: &'static str, expected: usize, actual: usize) -> DiffMcResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(DiffMcError::GridSizeMismatch {
            what,
            expected,
            actual,
        })
    }
}

fn coordinate_scale<T: Real>(space: CoordinateSpace, dims: [usize; 3]) -> Position<T> {
    match space {
        CoordinateSpace::Lattice => Position::from_element(T::one()),
        CoordinateSpace::Normalized => Position::from_fn(|i, _| {
            T::one() / T::cast_usize(dims[i].saturating_sub(1).max(1))
        }),
    }
}
