//! Owned host-side copy of an extraction result.
//!
//! The engine emits one vertex per crossed edge per used cell, so a lattice
//! edge shared by several used cells appears several times. Each vertex
//! remembers the lattice edge it lies on, which is all [`ExtractedMesh::welded`]
//! needs to merge the copies into a shared-vertex mesh.

use hashbrown::HashMap;

use crate::types::{Feature, Position, Real, Triangle};

/// Extracted surface with per-vertex features.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedMesh<T: Real> {
    /// Vertex positions.
    pub positions: Vec<Position<T>>,
    /// Per-vertex feature vectors.
    pub features: Vec<Feature<T>>,
    /// Lattice edge of each vertex as two sample ids, smaller first.
    pub edges: Vec<[u32; 2]>,
    /// Triangles.
    pub triangles: Vec<Triangle>,
}

impl<T: Real> ExtractedMesh<T> {
    /// Number of vertices.
    #[must_use]
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of triangles.
    #[must_use]
    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    /// Whether the mesh has no triangles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    /// Merge vertices that lie on the same lattice edge.
    ///
    /// The first occurrence in output order is kept, along with its
    /// position and feature. Triangle order is unchanged.
    #[must_use]
    pub fn welded(&self) -> Self {
        let mut remap = Vec::with_capacity(self.positions.len());
        let mut first_seen: HashMap<[u32; 2], u32> = HashMap::new();
        let mut welded = Self {
            positions: Vec::new(),
            features: Vec::new(),
            edges: Vec::new(),
            triangles: Vec::with_capacity(self.triangles.len()),
        };

        for (v, edge) in self.edges.iter().enumerate() {
            // Welded count <= input count, which u32 triangle indices bound.
            #[allow(clippy::cast_possible_truncation)]
            let next = welded.positions.len() as u32;
            let index = *first_seen.entry(*edge).or_insert_with(|| {
                welded.positions.push(self.positions[v]);
                welded.features.push(self.features[v]);
                welded.edges.push(*edge);
                next
            });
            remap.push(index);
        }

        welded.triangles.extend(self.triangles.iter().map(|tri| {
            let [i, j, k] = tri.indices().map(|i| remap[i as usize]);
            Triangle::new(i, j, k)
        }));
        welded
    }

    /// Number of undirected edges used by exactly one triangle.
    ///
    /// Zero for a closed surface. Only meaningful after [`welded`](Self::welded);
    /// unwelded output has a boundary along every cell face.
    #[must_use]
    pub fn boundary_edge_count(&self) -> usize {
        edge_use_counts(&self.triangles)
            .values()
            .filter(|&&uses| uses == 1)
            .count()
    }

    /// `V - E + F`. Two for a closed genus-0 surface.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn euler_characteristic(&self) -> i64 {
        let edges = edge_use_counts(&self.triangles).len();
        self.positions.len() as i64 - edges as i64 + self.triangles.len() as i64
    }
}

fn edge_use_counts(triangles: &[Triangle]) -> HashMap<(u32, u32), usize> {
    let mut counts: HashMap<(u32, u32), usize> = HashMap::new();
    for tri in triangles {
        let idx = tri.indices();
        for i in 0..3 {
            let (a, b) = (idx[i], idx[(i + 1) % 3]);
            *counts.entry((a.min(b), a.max(b))).or_default() += 1;
        }
    }
    counts
}
