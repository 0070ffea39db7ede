//! End-to-end tests for the forward and backward passes.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]

use approx::assert_relative_eq;
use mesh_diffmc::tables;
use mesh_diffmc::{
    CoordinateSpace, DiffMcError, EngineConfig, FEATURE_DIM, Feature, FieldGrid, MarchingCubes,
    MeshCounts, Position,
};

// =============================================================================
// Fixtures
// =============================================================================

/// Distance from `center`, sampled on the lattice.
fn sphere(dims: [usize; 3], center: [f64; 3]) -> FieldGrid<f64> {
    let c = Position::from(center);
    FieldGrid::from_fn(dims, |x, y, z| {
        (Position::new(x as f64, y as f64, z as f64) - c).norm()
    })
    .unwrap()
}

/// An anisotropic ellipsoid with features that vary along every axis.
fn ellipsoid(dims: [usize; 3]) -> FieldGrid<f64> {
    FieldGrid::from_fn(dims, |x, y, z| {
        let (x, y, z) = (x as f64, y as f64, z as f64);
        (x - 1.2).powi(2) + 0.8 * (y - 1.4).powi(2) + 1.3 * (z - 1.1).powi(2) - 1.5
    })
    .unwrap()
    .with_features_fn(|x, y, z| {
        Feature::from_fn(|k, _| {
            let k = k as f64;
            0.1 * (k + 1.0) * x as f64 + 0.2 * y as f64 - 0.05 * k * z as f64
        })
    })
}

fn engine() -> MarchingCubes<f64> {
    MarchingCubes::new(EngineConfig::default()).unwrap()
}

/// Configuration code of an interior cell, computed independently.
fn code_of(grid: &FieldGrid<f64>, [x, y, z]: [usize; 3], iso: f64) -> u8 {
    tables::CORNER_OFFSETS
        .iter()
        .enumerate()
        .fold(0, |code, (bit, [dx, dy, dz])| {
            if grid.get(x + dx, y + dy, z + dz) < iso {
                code | (1 << bit)
            } else {
                code
            }
        })
}

// =============================================================================
// Reference scenario
// =============================================================================

#[test]
fn test_sphere_reference_counts() {
    let grid = sphere([3, 3, 3], [1.0, 1.0, 1.0]);
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.5)
        .unwrap();

    // Each of the 8 cells has only the center corner inside: case 1 of the
    // table, 3 vertices and 1 triangle.
    assert_eq!(
        out.counts,
        MeshCounts {
            used_cells: 8,
            vertices: 24,
            triangles: 8,
        }
    );
    for p in out.positions {
        assert_relative_eq!((p - Position::new(1.0, 1.0, 1.0)).norm(), 0.5, epsilon = 1e-12);
    }
}

#[test]
fn test_sphere_welds_to_octahedron() {
    let grid = sphere([3, 3, 3], [1.0, 1.0, 1.0]);
    let mut mc = engine();
    let mesh = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.5)
        .unwrap()
        .to_mesh();

    // Unwelded: every triangle is its own island.
    assert_eq!(mesh.boundary_edge_count(), 24);

    let welded = mesh.welded();
    assert_eq!(welded.vertex_count(), 6);
    assert_eq!(welded.triangle_count(), 8);
    assert_eq!(welded.boundary_edge_count(), 0);
    assert_eq!(welded.euler_characteristic(), 2);
}

#[test]
fn test_larger_sphere_is_watertight() {
    let grid = sphere([8, 8, 8], [3.5, 3.4, 3.6]);
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 2.3)
        .unwrap();
    assert!(out.counts.triangles > 0);

    let welded = out.to_mesh().welded();
    assert_eq!(welded.boundary_edge_count(), 0);
    assert_eq!(welded.euler_characteristic(), 2);
}

// =============================================================================
// Compaction and interpolation invariants
// =============================================================================

#[test]
fn test_counts_match_table_sums() {
    let grid = ellipsoid([4, 4, 4]);
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.0)
        .unwrap();

    let (mut used, mut verts, mut tris) = (0, 0, 0);
    for x in 0..3 {
        for y in 0..3 {
            for z in 0..3 {
                let code = code_of(&grid, [x, y, z], 0.0);
                if tables::is_active(code) {
                    used += 1;
                    verts += tables::vertex_count(code) as usize;
                    tris += tables::triangle_count(code) as usize;
                }
            }
        }
    }
    assert_eq!(out.counts.used_cells, used);
    assert_eq!(out.counts.vertices, verts);
    assert_eq!(out.counts.triangles, tris);
}

#[test]
fn test_output_in_cell_order() {
    let grid = ellipsoid([4, 4, 4]);
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.0)
        .unwrap();

    let cells: Vec<usize> = (0..out.counts.vertices).map(|v| out.vertex_cell(v)).collect();
    assert!(cells.windows(2).all(|w| w[0] <= w[1]));
    for &i in out.indices() {
        assert!((i as usize) < out.counts.vertices);
    }
}

#[test]
fn test_vertices_interpolate_to_isovalue() {
    let grid = ellipsoid([4, 4, 4]);
    let iso = 0.0;
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), iso)
        .unwrap();
    let indexer = grid.indexer();

    for v in 0..out.counts.vertices {
        let [a, b] = out.vertex_samples(v);
        let pa = indexer.coords(a).map(|c| c as f64);
        let pb = indexer.coords(b).map(|c| c as f64);
        let p = out.positions[v];

        // Componentwise between the endpoints.
        for axis in 0..3 {
            let (lo, hi) = (pa[axis].min(pb[axis]), pa[axis].max(pb[axis]));
            assert!(p[axis] >= lo - 1e-12 && p[axis] <= hi + 1e-12);
        }

        // The scalar interpolated with the same weight equals the isovalue.
        let pa = Position::from(pa);
        let pb = Position::from(pb);
        let t = (p - pa).norm() / (pb - pa).norm();
        let (sa, sb) = (grid.scalars()[a], grid.scalars()[b]);
        assert_relative_eq!(sa + t * (sb - sa), iso, epsilon = 1e-9);

        // Features use the same weight.
        let expected = grid.features()[a].lerp(&grid.features()[b], t);
        assert_relative_eq!(out.features[v], expected, epsilon = 1e-9);
    }
}

// =============================================================================
// Empty, full and boundary cases
// =============================================================================

#[test]
fn test_all_above_isovalue_is_empty() {
    let grid = FieldGrid::<f64>::from_fn([5, 4, 3], |_, _, _| 1.0).unwrap();
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.0)
        .unwrap();
    assert_eq!(out.counts, MeshCounts::default());
    assert!(out.to_mesh().is_empty());

    let grads = mc.backward(grid.scalars(), grid.features(), &[], &[], 0.0).unwrap();
    assert_eq!(grads.len(), 60);
    assert!(grads.is_zero());
}

#[test]
fn test_all_below_isovalue_is_empty() {
    let grid = FieldGrid::<f64>::from_fn([3, 3, 3], |_, _, _| -1.0).unwrap();
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.0)
        .unwrap();
    assert_eq!(out.counts.triangles, 0);
}

#[test]
fn test_isovalue_equal_to_corner() {
    // Corner values land exactly on the isovalue.
    let grid = FieldGrid::<f64>::from_fn([3, 3, 3], |x, y, z| (x + y + z) as f64).unwrap();
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 3.0)
        .unwrap();
    assert!(out.counts.triangles > 0);
    assert!(
        out.positions
            .iter()
            .all(|p| p.iter().all(|c| c.is_finite()))
    );

    let n = out.counts.vertices;
    let grads = mc
        .backward(
            grid.scalars(),
            grid.features(),
            &vec![Position::new(1.0, 1.0, 1.0); n],
            &vec![Feature::zeros(); n],
            3.0,
        )
        .unwrap();
    assert!(grads.scalars.iter().all(|g| g.is_finite()));
}

#[test]
fn test_degenerate_field_has_no_nan() {
    // A flat field at the isovalue has no crossings at all.
    let grid = FieldGrid::<f64>::from_fn([3, 3, 3], |_, _, _| 0.5).unwrap();
    let mut mc = engine();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.5)
        .unwrap();
    assert_eq!(out.counts.vertices, 0);
    assert_eq!(mc.last_stats().unwrap().degenerate_edges, 0);
}

// =============================================================================
// Determinism and configuration
// =============================================================================

#[test]
fn test_repeated_forward_is_bit_identical() {
    let grid = ellipsoid([6, 5, 7]);
    let mut mc = engine();
    let first = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.0)
        .unwrap()
        .to_mesh();
    let second = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.0)
        .unwrap()
        .to_mesh();
    assert_eq!(first, second);
}

#[test]
fn test_schedule_does_not_change_output() {
    let grid = sphere([9, 7, 8], [4.1, 3.2, 3.9]);
    let reference = engine()
        .forward(grid.scalars(), grid.features(), grid.dims(), 2.7)
        .unwrap()
        .to_mesh();

    for config in [
        EngineConfig::single_threaded(),
        EngineConfig::default().with_block_size(1),
        EngineConfig::default().with_block_size(7).with_num_threads(3),
    ] {
        let mut mc = MarchingCubes::new(config).unwrap();
        let mesh = mc
            .forward(grid.scalars(), grid.features(), grid.dims(), 2.7)
            .unwrap()
            .to_mesh();
        assert_eq!(mesh, reference);
    }
}

#[test]
fn test_normalized_coordinates() {
    let grid = sphere([5, 9, 3], [2.0, 4.0, 1.0]);
    let mut lattice = engine();
    let mut unit = MarchingCubes::new(
        EngineConfig::default().with_coordinates(CoordinateSpace::Normalized),
    )
    .unwrap();

    let a = lattice
        .forward(grid.scalars(), grid.features(), grid.dims(), 1.5)
        .unwrap()
        .to_mesh();
    let b = unit
        .forward(grid.scalars(), grid.features(), grid.dims(), 1.5)
        .unwrap()
        .to_mesh();

    assert_eq!(a.triangles, b.triangles);
    let scale = Position::new(1.0 / 4.0, 1.0 / 8.0, 1.0 / 2.0);
    for (pa, pb) in a.positions.iter().zip(&b.positions) {
        assert_relative_eq!(pa.component_mul(&scale), *pb, epsilon = 1e-12);
        assert!(pb.iter().all(|&c| (-1e-12..=1.0 + 1e-12).contains(&c)));
    }
}

#[test]
fn test_f32_engine() {
    let grid = FieldGrid::<f32>::from_fn([3, 3, 3], |x, y, z| {
        let d = [x as f32 - 1.0, y as f32 - 1.0, z as f32 - 1.0];
        (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
    })
    .unwrap();
    let mut mc = MarchingCubes::<f32>::new(EngineConfig::default()).unwrap();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.5)
        .unwrap();
    assert_eq!(out.counts.vertices, 24);
    assert_eq!(out.counts.triangles, 8);
}

// =============================================================================
// Buffers
// =============================================================================

#[test]
fn test_buffers_never_shrink() {
    let big = sphere([10, 10, 10], [4.5, 4.5, 4.5]);
    let small = sphere([3, 3, 3], [1.0, 1.0, 1.0]);
    let mut mc = engine();

    mc.forward(big.scalars(), big.features(), big.dims(), 3.0)
        .unwrap();
    let high = mc.buffers().allocated_bytes();
    assert!(high > 0);

    let out = mc
        .forward(small.scalars(), small.features(), small.dims(), 0.5)
        .unwrap();
    // Used counts describe this call only.
    assert_eq!(out.counts.vertices, 24);
    assert_eq!(mc.buffers().allocated_bytes(), high);
}

#[test]
fn test_memory_limit_reports_out_of_memory() {
    let grid = sphere([10, 10, 10], [4.5, 4.5, 4.5]);
    let mut mc = MarchingCubes::new(EngineConfig::bounded(2048)).unwrap();
    let err = mc.forward(grid.scalars(), grid.features(), grid.dims(), 3.0);
    match err {
        Err(DiffMcError::OutOfMemory { available, .. }) => assert_eq!(available, 2048),
        other => panic!("expected OutOfMemory, got {other:?}"),
    }
    assert_eq!(mc.counts(), MeshCounts::default());
    assert!(mc.positions().is_empty());
    assert!(mc.buffers().allocated_bytes() <= 2048);
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_invalid_dimensions() {
    let mut mc = engine();
    let err = mc.forward(&[0.0; 4], &[Feature::zeros(); 4], [4, 1, 1], 0.0);
    assert!(matches!(err, Err(DiffMcError::InvalidDimensions { .. })));
    assert!(mc.resize([0, 2, 2]).is_err());
}

#[test]
fn test_grid_size_mismatch() {
    let grid = sphere([3, 3, 3], [1.0, 1.0, 1.0]);
    let mut mc = engine();
    let err = mc.forward(grid.scalars(), &grid.features()[..20], grid.dims(), 0.5);
    match err {
        Err(DiffMcError::GridSizeMismatch {
            what,
            expected,
            actual,
        }) => {
            assert_eq!(what, "feature grid");
            assert_eq!(expected, 27);
            assert_eq!(actual, 20);
        }
        other => panic!("expected GridSizeMismatch, got {other:?}"),
    }
}

#[test]
fn test_backward_gradient_length_checked() {
    let grid = sphere([3, 3, 3], [1.0, 1.0, 1.0]);
    let mut mc = engine();
    mc.forward(grid.scalars(), grid.features(), grid.dims(), 0.5)
        .unwrap();
    let err = mc.backward(
        grid.scalars(),
        grid.features(),
        &[Position::zeros(); 23],
        &[Feature::zeros(); 24],
        0.5,
    );
    assert!(matches!(
        err,
        Err(DiffMcError::GridSizeMismatch {
            what: "position gradients",
            ..
        })
    ));
}

#[test]
fn test_backward_after_resize_is_rejected() {
    let grid = sphere([3, 3, 3], [1.0, 1.0, 1.0]);
    let mut mc = engine();
    mc.forward(grid.scalars(), grid.features(), grid.dims(), 0.5)
        .unwrap();
    mc.resize([4, 4, 4]).unwrap();
    let err = mc.backward(grid.scalars(), grid.features(), &[], &[], 0.5);
    assert!(matches!(err, Err(DiffMcError::TopologyMismatch(_))));
}

// =============================================================================
// Statistics
// =============================================================================

#[test]
fn test_last_stats() {
    let grid = sphere([3, 3, 3], [1.0, 1.0, 1.0]);
    let mut mc = engine();
    mc.forward(grid.scalars(), grid.features(), grid.dims(), 0.5)
        .unwrap();
    let stats = mc.last_stats().unwrap();
    assert_eq!(stats.dims, [3, 3, 3]);
    assert_eq!(stats.counts.triangles, 8);
    assert_eq!(stats.degenerate_edges, 0);
    assert!(stats.compute_time_ms >= 0.0);
    assert!(format!("{stats}").contains("24 vertices"));
}

#[test]
fn test_feature_dim() {
    assert_eq!(FEATURE_DIM, 8);
    assert_eq!(Feature::<f64>::zeros().len(), FEATURE_DIM);
}
