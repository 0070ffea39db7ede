//! Finite-difference verification of the backward pass.
//!
//! Each test builds a smooth field whose samples all sit well away from the
//! isovalue, so a small perturbation never changes the topology, and
//! compares backward gradients against central differences of the loss.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::float_cmp,
    clippy::cast_precision_loss
)]

use approx::assert_relative_eq;
use mesh_diffmc::{
    CoordinateSpace, EngineConfig, Feature, FieldGrid, GridGradients, MarchingCubes, MeshCounts,
    Position,
};

const EPS: f64 = 1e-6;
const TOL: f64 = 1e-5;

// =============================================================================
// Fixtures
// =============================================================================

/// Off-center sphere on a 3x3x3 lattice (2x2x2 cells); isovalue 0.8.
fn small_sphere() -> FieldGrid<f64> {
    let c = Position::new(1.1, 0.9, 1.05);
    FieldGrid::from_fn([3, 3, 3], |x, y, z| {
        (Position::new(x as f64, y as f64, z as f64) - c).norm()
    })
    .unwrap()
    .with_features_fn(|x, y, z| {
        Feature::from_fn(|k, _| (k as f64 + 1.0) * 0.3 * x as f64 - 0.7 * y as f64 + 0.1 * z as f64)
    })
}

/// Ellipsoid on a 4x4x4 lattice; isovalue 0.0.
fn ellipsoid() -> FieldGrid<f64> {
    FieldGrid::from_fn([4, 4, 4], |x, y, z| {
        let (x, y, z) = (x as f64, y as f64, z as f64);
        (x - 1.2).powi(2) + 0.8 * (y - 1.4).powi(2) + 1.3 * (z - 1.1).powi(2) - 1.5
    })
    .unwrap()
    .with_features_fn(|x, y, z| {
        Feature::from_fn(|k, _| ((k * 3 + x + 2 * y + z) % 5) as f64 * 0.25)
    })
}

/// Per-vertex loss weights: `L = sum(wp_v . p_v) + sum(wf_v . f_v)`.
struct Weights {
    positions: Vec<Position<f64>>,
    features: Vec<Feature<f64>>,
}

impl Weights {
    /// `L = sum of every vertex coordinate`.
    fn coordinate_sum(n: usize) -> Self {
        Self {
            positions: vec![Position::new(1.0, 1.0, 1.0); n],
            features: vec![Feature::zeros(); n],
        }
    }

    /// Weights that differ per vertex and per component.
    fn varied(n: usize, with_positions: bool, with_features: bool) -> Self {
        let positions = (0..n)
            .map(|v| {
                if with_positions {
                    Position::new(1.0 + v as f64 * 0.1, -0.5, (v % 3) as f64)
                } else {
                    Position::zeros()
                }
            })
            .collect();
        let features = (0..n)
            .map(|v| {
                if with_features {
                    Feature::from_fn(|k, _| ((v + k) % 4) as f64 - 1.5)
                } else {
                    Feature::zeros()
                }
            })
            .collect();
        Self {
            positions,
            features,
        }
    }
}

/// Run a fresh forward pass and evaluate the weighted loss.
fn loss(grid: &FieldGrid<f64>, iso: f64, config: &EngineConfig, w: &Weights) -> (f64, MeshCounts) {
    let mut mc = MarchingCubes::new(config.clone()).unwrap();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), iso)
        .unwrap();
    assert_eq!(out.counts.vertices, w.positions.len(), "topology changed");
    let value = out
        .positions
        .iter()
        .zip(&w.positions)
        .map(|(p, wp)| p.dot(wp))
        .sum::<f64>()
        + out
            .features
            .iter()
            .zip(&w.features)
            .map(|(f, wf)| f.dot(wf))
            .sum::<f64>();
    (value, out.counts)
}

fn vertex_count(grid: &FieldGrid<f64>, iso: f64, config: &EngineConfig) -> usize {
    let mut mc = MarchingCubes::new(config.clone()).unwrap();
    mc.forward(grid.scalars(), grid.features(), grid.dims(), iso)
        .unwrap()
        .counts
        .vertices
}

fn backward(
    grid: &FieldGrid<f64>,
    iso: f64,
    config: &EngineConfig,
    w: &Weights,
) -> GridGradients<f64> {
    let mut mc = MarchingCubes::new(config.clone()).unwrap();
    mc.forward(grid.scalars(), grid.features(), grid.dims(), iso)
        .unwrap();
    mc.backward(grid.scalars(), grid.features(), &w.positions, &w.features, iso)
        .unwrap()
}

fn check_scalar_gradients(grid: &FieldGrid<f64>, iso: f64, config: &EngineConfig, w: &Weights) {
    let grads = backward(grid, iso, config, w);
    let mut nonzero = 0;
    for sample in 0..grid.scalars().len() {
        let mut plus = grid.clone();
        plus.scalars_mut()[sample] += EPS;
        let mut minus = grid.clone();
        minus.scalars_mut()[sample] -= EPS;
        let fd = (loss(&plus, iso, config, w).0 - loss(&minus, iso, config, w).0) / (2.0 * EPS);

        assert_relative_eq!(grads.scalars[sample], fd, epsilon = TOL, max_relative = TOL);
        if fd.abs() > TOL {
            nonzero += 1;
        }
    }
    assert!(nonzero > 0, "loss does not depend on the grid");
}

// =============================================================================
// Scalar gradients
// =============================================================================

#[test]
fn test_scalar_gradient_coordinate_sum_small_grid() {
    let grid = small_sphere();
    let config = EngineConfig::default();
    let n = vertex_count(&grid, 0.8, &config);
    assert!(n > 0);
    check_scalar_gradients(&grid, 0.8, &config, &Weights::coordinate_sum(n));
}

#[test]
fn test_scalar_gradient_varied_weights() {
    let grid = ellipsoid();
    let config = EngineConfig::default();
    let n = vertex_count(&grid, 0.0, &config);
    check_scalar_gradients(&grid, 0.0, &config, &Weights::varied(n, true, false));
}

#[test]
fn test_scalar_gradient_through_features() {
    // Features move with t, so a feature-only loss still reaches the scalars.
    let grid = ellipsoid();
    let config = EngineConfig::default();
    let n = vertex_count(&grid, 0.0, &config);
    check_scalar_gradients(&grid, 0.0, &config, &Weights::varied(n, false, true));
}

#[test]
fn test_scalar_gradient_mixed_loss_normalized() {
    let grid = ellipsoid();
    let config = EngineConfig::default().with_coordinates(CoordinateSpace::Normalized);
    let n = vertex_count(&grid, 0.0, &config);
    check_scalar_gradients(&grid, 0.0, &config, &Weights::varied(n, true, true));
}

#[test]
fn test_scalar_gradient_single_threaded_small_blocks() {
    let grid = small_sphere();
    let config = EngineConfig::single_threaded().with_block_size(2);
    let n = vertex_count(&grid, 0.8, &config);
    check_scalar_gradients(&grid, 0.8, &config, &Weights::varied(n, true, true));
}

// =============================================================================
// Feature gradients
// =============================================================================

#[test]
fn test_feature_gradient_matches_finite_difference() {
    let grid = ellipsoid();
    let config = EngineConfig::default();
    let n = vertex_count(&grid, 0.0, &config);
    let w = Weights::varied(n, true, true);
    let grads = backward(&grid, 0.0, &config, &w);

    for sample in 0..grid.features().len() {
        for k in [0, 3, 7] {
            let mut plus = grid.clone();
            plus.features_mut()[sample][k] += EPS;
            let mut minus = grid.clone();
            minus.features_mut()[sample][k] -= EPS;
            let fd =
                (loss(&plus, 0.0, &config, &w).0 - loss(&minus, 0.0, &config, &w).0) / (2.0 * EPS);
            assert_relative_eq!(grads.features[sample][k], fd, epsilon = TOL, max_relative = TOL);
        }
    }
}

#[test]
fn test_feature_gradient_is_partition_of_unity() {
    // With weight 1 on feature 0 of every vertex, each vertex hands out
    // (1 - t) + t = 1 across its two endpoints.
    let grid = small_sphere();
    let config = EngineConfig::default();
    let n = vertex_count(&grid, 0.8, &config);
    let mut w = Weights::coordinate_sum(n);
    w.positions.fill(Position::zeros());
    for f in &mut w.features {
        f[0] = 1.0;
    }
    let grads = backward(&grid, 0.8, &config, &w);
    let total: f64 = grads.features.iter().map(|f| f[0]).sum();
    assert_relative_eq!(total, n as f64, epsilon = 1e-9);
    assert!(grads.features.iter().all(|f| f[1] == 0.0));
}

// =============================================================================
// Structure of the gradients
// =============================================================================

#[test]
fn test_gradient_zero_away_from_surface() {
    // Only samples on a crossed edge can influence the output.
    let grid = FieldGrid::<f64>::from_fn([6, 6, 6], |x, y, z| {
        (Position::new(x as f64, y as f64, z as f64) - Position::new(1.2, 1.1, 1.3)).norm()
    })
    .unwrap();
    let config = EngineConfig::default();
    let mut mc = MarchingCubes::new(config).unwrap();
    let out = mc
        .forward(grid.scalars(), grid.features(), grid.dims(), 0.9)
        .unwrap();
    let mut touched = vec![false; grid.scalars().len()];
    for v in 0..out.counts.vertices {
        for s in out.vertex_samples(v) {
            touched[s] = true;
        }
    }
    let w = Weights::coordinate_sum(out.counts.vertices);
    let grads = mc
        .backward(grid.scalars(), grid.features(), &w.positions, &w.features, 0.9)
        .unwrap();

    for (sample, g) in grads.scalars.iter().enumerate() {
        if !touched[sample] {
            assert_eq!(*g, 0.0, "sample {sample}");
        }
    }
    assert!(touched.iter().any(|&t| !t));
}

#[test]
fn test_backward_repeatable() {
    let grid = ellipsoid();
    let config = EngineConfig::default();
    let n = vertex_count(&grid, 0.0, &config);
    let w = Weights::varied(n, true, true);
    let a = backward(&grid, 0.0, &config, &w);
    let b = backward(&grid, 0.0, &config.clone().with_num_threads(4), &w);
    for (x, y) in a.scalars.iter().zip(&b.scalars) {
        // Atomic accumulation order may differ; only rounding can change.
        assert_relative_eq!(*x, *y, epsilon = 1e-12, max_relative = 1e-12);
    }
}

#[test]
fn test_f32_matches_f64() {
    let grid64 = small_sphere();
    let config = EngineConfig::default();
    let n = vertex_count(&grid64, 0.8, &config);
    let w = Weights::varied(n, true, true);
    let g64 = backward(&grid64, 0.8, &config, &w);

    let scalars: Vec<f32> = grid64.scalars().iter().map(|&s| s as f32).collect();
    let features: Vec<Feature<f32>> = grid64.features().iter().map(|f| f.cast::<f32>()).collect();
    let grid32 = FieldGrid::from_parts(grid64.dims(), scalars, features).unwrap();
    let wp: Vec<Position<f32>> = w.positions.iter().map(|p| p.cast::<f32>()).collect();
    let wf: Vec<Feature<f32>> = w.features.iter().map(|f| f.cast::<f32>()).collect();

    let mut mc = MarchingCubes::<f32>::new(config).unwrap();
    mc.forward(grid32.scalars(), grid32.features(), grid32.dims(), 0.8)
        .unwrap();
    let g32 = mc
        .backward(grid32.scalars(), grid32.features(), &wp, &wf, 0.8)
        .unwrap();

    for (a, b) in g64.scalars.iter().zip(&g32.scalars) {
        assert_relative_eq!(*a, f64::from(*b), epsilon = 1e-3, max_relative = 1e-3);
    }
}

// =============================================================================
// Extreme edge differences
// =============================================================================

/// Single cell with corner 0 at `-s` and every other sample at `s`;
/// loss is the sum of all vertex coordinates.
fn single_corner_gradient(s: f64) -> GridGradients<f64> {
    let mut scalars = vec![s; 8];
    scalars[0] = -s;
    let features = vec![Feature::zeros(); 8];
    let mut mc = MarchingCubes::new(EngineConfig::default()).unwrap();
    let n = mc
        .forward(&scalars, &features, [2, 2, 2], 0.0)
        .unwrap()
        .counts
        .vertices;
    assert_eq!(n, 3);
    mc.backward(
        &scalars,
        &features,
        &vec![Position::new(1.0, 1.0, 1.0); n],
        &vec![Feature::zeros(); n],
        0.0,
    )
    .unwrap()
}

#[test]
fn test_gradient_scales_with_edge_difference() {
    // Each of the three vertices sits at t = 1/2 and contributes -1/(4s)
    // to corner 0: dL/ds0 = -3/(4s).
    for s in [1.0, 1e-170, 1e200] {
        let grads = single_corner_gradient(s);
        let expected = -0.75 / s;
        assert!(grads.scalars[0].is_finite() && grads.scalars[0] != 0.0, "s = {s}");
        assert_relative_eq!(grads.scalars[0], expected, max_relative = 1e-12);
        // Linear ids of corners 1, 3 and 4 under z-fastest layout.
        for neighbor in [4, 2, 1] {
            assert_relative_eq!(grads.scalars[neighbor], -0.25 / s, max_relative = 1e-12);
        }
    }
}
