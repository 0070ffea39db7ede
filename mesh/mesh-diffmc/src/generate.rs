//! Stage 3: vertex and triangle generation.
//!
//! Each used cell emits one vertex per crossed edge, in ascending local edge
//! order, followed by the triangles of its case. Vertices are not shared
//! between neighbouring cells; a lattice edge crossed by the surface yields
//! one vertex in every used cell that contains it.

use rayon::prelude::*;

use crate::classify::FieldView;
use crate::tables::{self, EDGE_CORNERS};
use crate::types::{Feature, Position, Real, Triangle, VertexTag};

/// Dense per-used-cell tables produced by compaction.
#[derive(Debug, Clone, Copy)]
pub struct UsedCells<'a> {
    /// Cell id of each used cell, ascending.
    pub cells: &'a [u32],
    /// Configuration code of each used cell.
    pub codes: &'a [u8],
    /// Offset of each used cell's first output vertex.
    pub first_vert: &'a [u32],
    /// Offset of each used cell's first output triangle.
    pub first_tri: &'a [u32],
}

impl UsedCells<'_> {
    /// Number of used cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether there are no used cells.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Used cell that emitted output vertex `vertex`.
    ///
    /// Every used cell emits at least three vertices, so first-vertex
    /// offsets are strictly increasing and the owner is unique.
    #[must_use]
    pub fn owner_of_vertex(&self, vertex: usize) -> usize {
        self.first_vert
            .partition_point(|&first| first as usize <= vertex)
            .saturating_sub(1)
    }
}

/// Mutable output arrays, each exactly as long as the current totals.
#[derive(Debug)]
pub struct GeometryOutputs<'a, T: Real> {
    /// Vertex positions.
    pub positions: &'a mut [Position<T>],
    /// Interpolated features.
    pub features: &'a mut [Feature<T>],
    /// Local edge of each vertex.
    pub tags: &'a mut [VertexTag],
    /// Triangles indexing into the vertex arrays.
    pub triangles: &'a mut [Triangle],
}

/// Interpolation parameter along an edge from `s0` to `s1`.
///
/// Returns `None` when the endpoints are equal; callers place the vertex at
/// the midpoint. Edges selected by a configuration code never hit this: one
/// endpoint is strictly below the isovalue and the other is not.
#[inline]
#[must_use]
pub fn edge_parameter<T: Real>(s0: T, s1: T, isovalue: T) -> Option<T> {
    let d = s1 - s0;
    if d == T::zero() {
        None
    } else {
        Some((isovalue - s0) / d)
    }
}

/// Midpoint weight used for degenerate edges.
#[inline]
pub(crate) fn half<T: Real>() -> T {
    T::cast_f64(0.5)
}

/// Fill every output array. Returns the number of degenerate edges met.
///
/// Work is split into blocks of `block_size` used cells; each block owns a
/// contiguous, disjoint range of every output array.
pub fn generate_geometry<T: Real>(
    field: &FieldView<'_, T>,
    used: &UsedCells<'_>,
    out: GeometryOutputs<'_, T>,
    block_size: usize,
) -> usize {
    let block_size = block_size.max(1);
    let total_verts = out.positions.len();
    let total_tris = out.triangles.len();

    let mut blocks = Vec::with_capacity(used.len().div_ceil(block_size));
    let GeometryOutputs {
        mut positions,
        mut features,
        mut tags,
        mut triangles,
    } = out;
    let mut start = 0;
    while start < used.len() {
        let end = (start + block_size).min(used.len());
        let vert_end = used.first_vert.get(end).map_or(total_verts, |&v| v as usize);
        let tri_end = used.first_tri.get(end).map_or(total_tris, |&t| t as usize);
        let vert_len = vert_end - used.first_vert[start] as usize;
        let tri_len = tri_end - used.first_tri[start] as usize;

        let (p, p_rest) = positions.split_at_mut(vert_len);
        let (f, f_rest) = features.split_at_mut(vert_len);
        let (g, g_rest) = tags.split_at_mut(vert_len);
        let (t, t_rest) = triangles.split_at_mut(tri_len);
        blocks.push((
            start..end,
            GeometryOutputs {
                positions: p,
                features: f,
                tags: g,
                triangles: t,
            },
        ));
        positions = p_rest;
        features = f_rest;
        tags = g_rest;
        triangles = t_rest;
        start = end;
    }

    blocks
        .into_par_iter()
        .map(|(range, block)| generate_block(field, used, range, block))
        .sum()
}

fn generate_block<T: Real>(
    field: &FieldView<'_, T>,
    used: &UsedCells<'_>,
    range: std::ops::Range<usize>,
    out: GeometryOutputs<'_, T>,
) -> usize {
    let mut degenerate = 0;
    let mut vert = 0;
    let mut tri = 0;

    for u in range {
        let code = used.codes[u];
        let corners = field.grid.corner_ids(used.cells[u] as usize);
        let base = used.first_vert[u];

        for edge in tables::crossed_edges(code) {
            let [c0, c1] = EDGE_CORNERS[edge];
            let (a, b) = (corners[c0], corners[c1]);
            let t = edge_parameter(field.scalars[a], field.scalars[b], field.isovalue)
                .unwrap_or_else(|| {
                    degenerate += 1;
                    half()
                });
            out.positions[vert] = field.sample_position(a).lerp(&field.sample_position(b), t);
            out.features[vert] = field.features[a].lerp(&field.features[b], t);
            // Edge indices are below 12.
            #[allow(clippy::cast_possible_truncation)]
            let tag = VertexTag(edge as u8);
            out.tags[vert] = tag;
            vert += 1;
        }

        for [e0, e1, e2] in tables::triangles(code) {
            let slot = |e| tables::local_vertex_slot(code, e);
            out.triangles[tri] = Triangle::new(slot(e0), slot(e1), slot(e2)).offset(base);
            tri += 1;
        }
    }

    degenerate
}
