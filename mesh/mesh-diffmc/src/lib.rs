//! Differentiable marching cubes.
//!
//! This crate extracts a triangle mesh from a scalar grid and, in the other
//! direction, turns gradients on that mesh back into gradients on the grid.
//! Every grid sample carries a fixed-width feature vector that is
//! interpolated onto the output vertices alongside their positions, so the
//! engine can sit inside a gradient-based fitting loop for implicit surfaces.
//!
//! # Pipeline
//!
//! | Stage    | Parallel over | Output                                        |
//! |----------|---------------|-----------------------------------------------|
//! | classify | cells         | configuration code and active flag per cell   |
//! | compact  | blocks        | dense used cells, first vertex/triangle each  |
//! | generate | used cells    | positions, features, vertex tags, triangles   |
//! | adjoint  | vertices      | atomically accumulated grid gradients         |
//!
//! Output sizes are data-dependent. Two exclusive prefix sums size the output
//! buffers before generation runs, and every used cell then writes into its
//! own disjoint range, so only the adjoint stage needs atomics.
//!
//! Vertices are not shared between cells: each used cell emits one vertex
//! per crossed edge. [`ExtractedMesh::welded`] merges the copies on the host
//! when a shared-vertex mesh is needed.
//!
//! # Layer 0 Crate
//!
//! This is a Layer 0 crate with **zero Bevy dependencies**. It can be used in:
//! - CLI tools
//! - Servers
//! - Training loops through FFI or Python bindings via `PyO3`
//!
//! # Example
//!
//! ```
//! use mesh_diffmc::{EngineConfig, Feature, FieldGrid, MarchingCubes, Position};
//!
//! // Distance from the center of a 3x3x3 lattice.
//! let grid = FieldGrid::<f64>::from_fn([3, 3, 3], |x, y, z| {
//!     (Position::new(x as f64, y as f64, z as f64) - Position::new(1.0, 1.0, 1.0)).norm()
//! })
//! .unwrap();
//!
//! let mut mc = MarchingCubes::new(EngineConfig::default()).unwrap();
//! let out = mc.forward(grid.scalars(), grid.features(), grid.dims(), 0.5).unwrap();
//!
//! // Eight corner cells, one triangle each.
//! assert_eq!(out.counts.used_cells, 8);
//! assert_eq!(out.counts.vertices, 24);
//! assert_eq!(out.counts.triangles, 8);
//!
//! // Welding shared edges closes the surface into an octahedron.
//! let mesh = out.to_mesh().welded();
//! assert_eq!(mesh.vertex_count(), 6);
//! assert_eq!(mesh.boundary_edge_count(), 0);
//!
//! // Loss = sum of all vertex coordinates.
//! let n = out.counts.vertices;
//! let grads = mc
//!     .backward(
//!         grid.scalars(),
//!         grid.features(),
//!         &vec![Position::new(1.0, 1.0, 1.0); n],
//!         &vec![Feature::zeros(); n],
//!         0.5,
//!     )
//!     .unwrap();
//! assert_eq!(grads.scalars.len(), 27);
//! ```
//!
//! # Quality Standards
//!
//! - Zero clippy/doc warnings
//! - Zero `unwrap`/`expect` in library code

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod adjoint;
pub mod atomic;
pub mod buffers;
pub mod classify;
pub mod compact;
pub mod config;
pub mod engine;
pub mod error;
pub mod generate;
pub mod grid;
pub mod index;
pub mod mesh;
pub mod result;
pub mod tables;
pub mod types;

pub use atomic::{AtomicGradientGrid, GridGradients};
pub use buffers::{BufferPool, BufferUsage, DeviceBuffer, NOT_USED};
pub use config::{CoordinateSpace, DEFAULT_BLOCK_SIZE, EngineConfig};
pub use engine::{ForwardOutput, MarchingCubes};
pub use error::{DiffMcError, DiffMcResult};
pub use grid::FieldGrid;
pub use index::GridIndexer;
pub use mesh::ExtractedMesh;
pub use result::{ExtractionStats, MeshCounts};
pub use types::{FEATURE_DIM, Feature, Position, Real, Triangle, VertexTag};
