//! Output counts and run statistics.

/// Sizes of the current output. These are the used counts of the last call,
/// not the buffer capacities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MeshCounts {
    /// Cells whose configuration emits at least one vertex.
    pub used_cells: usize,
    /// Output vertices.
    pub vertices: usize,
    /// Output triangles.
    pub triangles: usize,
}

impl MeshCounts {
    /// Whether no surface was extracted.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.triangles == 0
    }
}

/// Statistics for one successful forward pass.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExtractionStats {
    /// Sample dimensions [x, y, z].
    pub dims: [usize; 3],
    /// Output sizes.
    pub counts: MeshCounts,
    /// Crossed edges whose endpoint scalars were equal; their vertex sits at
    /// the midpoint. Corners count as inside only when strictly below the
    /// isovalue, so a crossed edge always has distinct finite endpoints and
    /// this stays 0 for any input `forward` accepts.
    pub degenerate_edges: usize,
    /// Wall-clock time of the pass in milliseconds.
    pub compute_time_ms: f64,
}

impl ExtractionStats {
    /// Fraction of lattice cells that emit geometry.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn occupancy(&self) -> f64 {
        let cells = self.dims.iter().map(|d| d.saturating_sub(1)).product::<usize>();
        if cells == 0 {
            0.0
        } else {
            self.counts.used_cells as f64 / cells as f64
        }
    }
}

impl std::fmt::Display for ExtractionStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Extraction {}x{}x{}: {} used cells, {} vertices, {} triangles, {} degenerate edges in {:.2}ms",
            self.dims[0],
            self.dims[1],
            self.dims[2],
            self.counts.used_cells,
            self.counts.vertices,
            self.counts.triangles,
            self.degenerate_edges,
            self.compute_time_ms
        )
    }
}
