//! Stage 4: the adjoint of generation.
//!
//! A vertex on the edge from sample `a` to sample `b` is
//!
//! ```text
//! t   = (iso - s_a) / (s_b - s_a)
//! p   = p_a + t (p_b - p_a)
//! f   = f_a + t (f_b - f_a)
//! ```
//!
//! so with `g_p = dL/dp` and `g_f = dL/df`:
//!
//! ```text
//! dL/dt   = g_p . (p_b - p_a) + g_f . (f_b - f_a)
//! dL/ds_a = dL/dt * (t - 1) / (s_b - s_a)
//! dL/ds_b = -dL/dt * t / (s_b - s_a)
//! dL/df_a = (1 - t) g_f
//! dL/df_b = t g_f
//! ```
//!
//! Sample positions are fixed by the lattice and receive no gradient. On a
//! degenerate edge `t` is held at one half, so both scalar terms vanish.

use rayon::prelude::*;

use crate::atomic::AtomicGradientGrid;
use crate::classify::FieldView;
use crate::generate::{UsedCells, edge_parameter, half};
use crate::types::{Feature, Position, Real, VertexTag};

/// Partial derivatives of one vertex with respect to its edge endpoints.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeAdjoint<T: Real> {
    /// Interpolation parameter the forward pass used.
    pub t: T,
    /// `dL/ds_a`.
    pub ds0: T,
    /// `dL/ds_b`.
    pub ds1: T,
}

/// Differentiate one interpolated vertex.
///
/// `dpos` and `dfeat` are the endpoint differences `p_b - p_a` and
/// `f_b - f_a`; `grad_pos` and `grad_feat` are the incoming gradients.
#[inline]
#[must_use]
pub fn edge_adjoint<T: Real>(
    s0: T,
    s1: T,
    isovalue: T,
    dpos: &Position<T>,
    dfeat: &Feature<T>,
    grad_pos: &Position<T>,
    grad_feat: &Feature<T>,
) -> EdgeAdjoint<T> {
    let Some(t) = edge_parameter(s0, s1, isovalue) else {
        return EdgeAdjoint {
            t: half(),
            ds0: T::zero(),
            ds1: T::zero(),
        };
    };
    // Written through t so the edge difference is never squared; the
    // square under- or overflows long before the derivative does.
    let d = s1 - s0;
    let dl_dt = grad_pos.dot(dpos) + grad_feat.dot(dfeat);
    EdgeAdjoint {
        t,
        ds0: dl_dt * (t - T::one()) / d,
        ds1: -dl_dt * t / d,
    }
}

/// Scatter output gradients back onto the grid samples.
///
/// Parallel over output vertices. `tags`, `grad_positions` and
/// `grad_features` must all have one entry per output vertex; the owning
/// used cell of each vertex is found by binary search over `used.first_vert`.
pub fn accumulate_adjoints<T: Real>(
    field: &FieldView<'_, T>,
    used: &UsedCells<'_>,
    tags: &[VertexTag],
    grad_positions: &[Position<T>],
    grad_features: &[Feature<T>],
    grads: &AtomicGradientGrid<T>,
    block_size: usize,
) {
    tags.par_iter()
        .zip(grad_positions.par_iter())
        .zip(grad_features.par_iter())
        .enumerate()
        .with_min_len(block_size.max(1))
        .for_each(|(vertex, ((tag, grad_pos), grad_feat))| {
            let owner = used.owner_of_vertex(vertex);
            let corners = field.grid.corner_ids(used.cells[owner] as usize);
            let [c0, c1] = tag.corners();
            let (a, b) = (corners[c0], corners[c1]);

            let dpos = field.sample_position(b) - field.sample_position(a);
            let dfeat = field.features[b] - field.features[a];
            let adj = edge_adjoint(
                field.scalars[a],
                field.scalars[b],
                field.isovalue,
                &dpos,
                &dfeat,
                grad_pos,
                grad_feat,
            );

            if adj.ds0 != T::zero() {
                grads.accumulate_scalar(a, adj.ds0);
            }
            if adj.ds1 != T::zero() {
                grads.accumulate_scalar(b, adj.ds1);
            }
            grads.accumulate_feature(a, &(grad_feat * (T::one() - adj.t)));
            grads.accumulate_feature(b, &(grad_feat * adj.t));
        });
}
