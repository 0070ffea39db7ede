//! Stage 2: stream compaction.
//!
//! Sparse per-cell results become dense output ranges through exclusive
//! prefix sums. Everything preserves linear cell-id order, which is the
//! canonical order of the forward output and of the backward re-derivation.

use rayon::prelude::*;

use crate::buffers::NOT_USED;
use crate::error::{DiffMcError, DiffMcResult};
use crate::tables;

/// Exclusive prefix sum of `values`, in place, returning the total.
///
/// Runs in three passes over blocks of `block_size` items: per-block sums
/// in parallel, a serial scan over the block sums, then a parallel local
/// scan seeded with each block's offset. On return `partials[b]` holds the
/// exclusive offset of block `b`, which later stages use to find the output
/// range each block owns.
///
/// # Errors
///
/// Returns [`DiffMcError::IndexOverflow`] if the total exceeds `u32::MAX`;
/// `values` is left unchanged in that case.
///
/// # Panics
///
/// Panics if `partials` is shorter than `values.len().div_ceil(block_size)`.
pub fn exclusive_scan_in_place(
    values: &mut [u32],
    partials: &mut [u64],
    block_size: usize,
    what: &'static str,
) -> DiffMcResult<u32> {
    let block_size = block_size.max(1);
    let blocks = values.len().div_ceil(block_size);
    let partials = &mut partials[..blocks];

    partials
        .par_iter_mut()
        .zip(values.par_chunks(block_size))
        .for_each(|(sum, chunk)| *sum = chunk.iter().map(|&v| u64::from(v)).sum());

    let mut total = 0u64;
    for sum in partials.iter_mut() {
        let block_total = *sum;
        *sum = total;
        total += block_total;
    }
    let total =
        u32::try_from(total).map_err(|_| DiffMcError::IndexOverflow { what, count: total })?;

    values
        .par_chunks_mut(block_size)
        .zip(partials.par_iter())
        .for_each(|(chunk, &offset)| {
            // Bounded by the checked total above.
            #[allow(clippy::cast_possible_truncation)]
            let mut running = offset as u32;
            for v in chunk {
                let count = *v;
                *v = running;
                running += count;
            }
        });

    Ok(total)
}

/// Gather active cells into dense used-cell arrays.
///
/// `cell_to_used` holds the scanned active flags on entry and the used-cell
/// index (or [`NOT_USED`]) of every cell on return. `block_offsets` are the
/// partials left by [`exclusive_scan_in_place`] with the same `block_size`.
/// `used_cells` and `used_codes` must be exactly the used-cell count long.
pub fn compact_active_cells(
    codes: &[u8],
    cell_to_used: &mut [u32],
    block_offsets: &[u64],
    block_size: usize,
    used_cells: &mut [u32],
    used_codes: &mut [u8],
) {
    let block_size = block_size.max(1);
    let blocks = codes.len().div_ceil(block_size);
    let total = used_cells.len();
    let block_offsets = &block_offsets[..blocks];

    // Carve the dense outputs into one disjoint range per block.
    let mut cells_rest = used_cells;
    let mut codes_rest = used_codes;
    let mut ranges = Vec::with_capacity(blocks);
    for b in 0..blocks {
        let end = block_offsets.get(b + 1).map_or(total, |&o| usize_from(o));
        let len = end - usize_from(block_offsets[b]);
        let (cells_head, cells_tail) = cells_rest.split_at_mut(len);
        let (codes_head, codes_tail) = codes_rest.split_at_mut(len);
        ranges.push((cells_head, codes_head));
        cells_rest = cells_tail;
        codes_rest = codes_tail;
    }

    codes
        .par_chunks(block_size)
        .zip(cell_to_used.par_chunks_mut(block_size))
        .zip(ranges.into_par_iter())
        .enumerate()
        .for_each(|(b, ((block_codes, block_map), (out_cells, out_codes)))| {
            let first_cell = b * block_size;
            let mut next = 0;
            let cells = block_codes.iter().zip(block_map.iter_mut()).enumerate();
            for (i, (&code, slot)) in cells {
                if tables::is_active(code) {
                    // Cell ids fit u32: the indexer rejects larger lattices.
                    #[allow(clippy::cast_possible_truncation)]
                    let cell = (first_cell + i) as u32;
                    out_cells[next] = cell;
                    out_codes[next] = code;
                    next += 1;
                } else {
                    *slot = NOT_USED;
                }
            }
        });
}

/// Per used cell vertex and triangle counts, ready to be scanned into
/// first-vertex and first-triangle offsets.
pub fn count_used_cell_outputs(
    used_codes: &[u8],
    vert_counts: &mut [u32],
    tri_counts: &mut [u32],
) {
    used_codes
        .par_iter()
        .zip(vert_counts.par_iter_mut())
        .zip(tri_counts.par_iter_mut())
        .for_each(|((&code, verts), tris)| {
            *verts = tables::vertex_count(code);
            *tris = tables::triangle_count(code);
        });
}

// Offsets are bounded by a checked u32 total.
#[allow(clippy::cast_possible_truncation)]
const fn usize_from(offset: u64) -> usize {
    offset as usize
}
