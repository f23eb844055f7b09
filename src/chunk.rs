//! Chunked distance evaluation: the tile kernel and the two parallel drivers.
//!
//! Both drivers walk the same tiling of the problem: X is cut into row tiles
//! of at most `chunk` rows, Y likewise, and every (X-tile, Y-tile) pair is
//! handed to [`process_tile`], which computes the GEMM cross-term for the
//! tile pair and folds the candidates into per-row bounded heaps. Tile sizes
//! bound the working set (one `p x q` scratch block plus `p` heaps of k
//! entries), independent of the full problem size.
//!
//! The drivers differ only in which axis carries the parallel loop:
//!
//! - [`chunk_on_x`] parallelizes over X-tiles. Each output row belongs to
//!   exactly one X-tile, so each worker writes candidate indices straight
//!   into its disjoint slice of the shared index table; `par_chunks_mut`
//!   hands out the non-overlapping slices, no reduction and no locks.
//! - [`chunk_on_y`] parallelizes over Y-tiles within each X-tile, for when n
//!   is too small to keep workers busy on the X axis. Workers accumulate
//!   into private heaps and merge them into the shared heap pair behind a
//!   mutex, one lock region per worker. Heap pushes form a commutative
//!   top-k reduction, so merge order cannot change the result.

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::gemm::{gemm_nt, Scalar};
use crate::heap::{self, heap_push, simultaneous_sort, NO_INDEX};

/// Per-worker scratch: one GEMM output tile plus a local heap pair.
///
/// Owned by a single rayon worker for its lifetime and dropped on worker
/// exit, on the error path as well as the normal one. `idx` stays empty in
/// the X-chunked driver, where candidate indices go straight to the shared
/// output table.
struct Scratch<T> {
    middle: Vec<T>,
    dist: Vec<T>,
    idx: Vec<i64>,
}

impl<T: Scalar> Scratch<T> {
    fn new(p: usize, q: usize, k: usize, private_indices: bool) -> Self {
        Self {
            middle: vec![T::zero(); p * q],
            dist: vec![T::infinity(); p * k],
            idx: if private_indices { vec![NO_INDEX; p * k] } else { Vec::new() },
        }
    }
}

/// Fold one (X-tile, Y-tile) pair into the row heaps.
///
/// `middle[..p*q] <- -2 * X_tile * Y_tile^T`, then every candidate
/// `(middle[i, j] + |Y_(y0+j)|^2, y0 + j)` is offered to the row-i heap.
/// On exit each row heap holds the k smallest reduced distances seen so far
/// for that row, with the worst retained key at the root.
#[allow(clippy::too_many_arguments)]
fn process_tile<T: Scalar>(
    x_tile: &[T],
    y_tile: &[T],
    y_offset: usize,
    y_sqnorms: &[T],
    dim: usize,
    k: usize,
    middle: &mut [T],
    heap_dist: &mut [T],
    heap_idx: &mut [i64],
) {
    let p = x_tile.len() / dim;
    let q = y_tile.len() / dim;
    debug_assert_eq!(y_sqnorms.len(), q);

    let neg_two = -(T::one() + T::one());
    gemm_nt(neg_two, x_tile, y_tile, middle, p, dim, q);

    for i in 0..p {
        let cross = &middle[i * q..(i + 1) * q];
        let dist_row = &mut heap_dist[i * k..(i + 1) * k];
        let index_row = &mut heap_idx[i * k..(i + 1) * k];
        for (j, (&g, &sq)) in cross.iter().zip(y_sqnorms).enumerate() {
            heap_push(dist_row, index_row, g + sq, (y_offset + j) as i64);
        }
    }
}

/// Parallel-on-X driver.
///
/// Static partition of X-tiles across the pool. Worker scratch (`middle`
/// plus the local heap distances) is allocated once per worker through
/// `for_each_init` and reused across the X-tiles that worker serves; the
/// heap distances are reset to the `+inf` sentinel before each tile (a
/// bulk zero-fill would not do, the sentinel is not an all-zero pattern).
/// Candidate indices live directly in the worker's disjoint slice of the
/// shared index table, so the per-row sort at the end permutes a local
/// distance row and a shared index row in lockstep.
pub(crate) fn chunk_on_x<T: Scalar>(
    x: &[T],
    y: &[T],
    dim: usize,
    k: usize,
    y_sqnorms: &[T],
    chunk: usize,
    indices: &mut [i64],
) {
    let n = x.len() / dim;
    let m = y.len() / dim;
    let p = n.min(chunk);
    let q = m.min(chunk);

    indices
        .par_chunks_mut(p * k)
        .enumerate()
        .for_each_init(
            || Scratch::new(p, q, k, false),
            |scratch, (tile, index_tile)| {
                let rows = index_tile.len() / k;
                let x_start = tile * p;
                let x_tile = &x[x_start * dim..(x_start + rows) * dim];

                let heap_dist = &mut scratch.dist[..rows * k];
                heap::reset(heap_dist, index_tile);

                for (y_tile_no, y_tile) in y.chunks(q * dim).enumerate() {
                    let y_start = y_tile_no * q;
                    let cols = y_tile.len() / dim;
                    process_tile(
                        x_tile,
                        y_tile,
                        y_start,
                        &y_sqnorms[y_start..y_start + cols],
                        dim,
                        k,
                        &mut scratch.middle,
                        heap_dist,
                        index_tile,
                    );
                }

                for i in 0..rows {
                    simultaneous_sort(
                        &mut heap_dist[i * k..(i + 1) * k],
                        &mut index_tile[i * k..(i + 1) * k],
                    );
                }
            },
        );
}

/// Parallel-on-Y driver.
///
/// Serial outer loop over X-tiles; the Y-tiles of each X-tile are folded in
/// parallel. Multiple workers produce candidates for the *same* query rows,
/// so each accumulates into a private heap pair and merges it into the
/// shared pair (the caller's distance and index tables, still in heap order)
/// under the mutex: the serialized reduction the shared rows require.
/// After all workers have merged, the tile's rows are sorted in parallel.
pub(crate) fn chunk_on_y<T: Scalar>(
    x: &[T],
    y: &[T],
    dim: usize,
    k: usize,
    y_sqnorms: &[T],
    chunk: usize,
    dist: &mut [T],
    indices: &mut [i64],
) {
    let n = x.len() / dim;
    let m = y.len() / dim;
    let p = n.min(chunk);
    let q = m.min(chunk);
    let y_tiles = m.div_ceil(q);

    for (tile, x_tile) in x.chunks(p * dim).enumerate() {
        let rows = x_tile.len() / dim;
        let x_start = tile * p;
        let dist_tile = &mut dist[x_start * k..(x_start + rows) * k];
        let index_tile = &mut indices[x_start * k..(x_start + rows) * k];
        let shared = Mutex::new((dist_tile, index_tile));

        (0..y_tiles)
            .into_par_iter()
            .fold(
                || Scratch::new(rows, q, k, true),
                |mut scratch, y_tile_no| {
                    let y_start = y_tile_no * q;
                    let cols = q.min(m - y_start);
                    let y_tile = &y[y_start * dim..(y_start + cols) * dim];
                    process_tile(
                        x_tile,
                        y_tile,
                        y_start,
                        &y_sqnorms[y_start..y_start + cols],
                        dim,
                        k,
                        &mut scratch.middle,
                        &mut scratch.dist,
                        &mut scratch.idx,
                    );
                    scratch
                },
            )
            .for_each(|scratch| {
                let mut guard = shared.lock();
                let (shared_dist, shared_idx) = &mut *guard;
                for i in 0..rows {
                    let dist_row = &mut shared_dist[i * k..(i + 1) * k];
                    let index_row = &mut shared_idx[i * k..(i + 1) * k];
                    for t in i * k..(i + 1) * k {
                        if scratch.idx[t] != NO_INDEX {
                            heap_push(dist_row, index_row, scratch.dist[t], scratch.idx[t]);
                        }
                    }
                }
            });

        let (dist_tile, index_tile) = shared.into_inner();
        dist_tile
            .par_chunks_mut(k)
            .zip(index_tile.par_chunks_mut(k))
            .for_each(|(dist_row, index_row)| simultaneous_sort(dist_row, index_row));
    }
}
