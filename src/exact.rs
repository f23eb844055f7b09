//! Exact Euclidean distances and the scalar math surface.
//!
//! The chunked kernel ranks candidates by the reduced distance
//! `g = -2<x, y> + |y|^2`, which drops the constant `|x|^2` term and suffers
//! catastrophic cancellation when `x` and `y` are nearly identical (two large
//! values subtracted). Once the winning indices are fixed, this module
//! recomputes the true distances with a fused subtract-square-accumulate
//! loop, which is numerically stable, and takes the square root at the end.

use num_traits::Float;
use rayon::prelude::*;

use crate::gemm::Scalar;
use crate::heap::{heap_push, simultaneous_sort, NO_INDEX};

/// Squared Euclidean distance between two equal-length rows.
///
/// Unrolled by 4 with independent accumulators so the partial sums carry no
/// serial dependency chain; the trailing elements (for dimensions not
/// divisible by 4) go through the scalar remainder loop.
#[inline(always)]
pub(crate) fn squared_euclidean<T: Float>(a: &[T], b: &[T]) -> T {
    debug_assert_eq!(a.len(), b.len());

    let split = a.len() / 4 * 4;
    let mut acc0 = T::zero();
    let mut acc1 = T::zero();
    let mut acc2 = T::zero();
    let mut acc3 = T::zero();

    for (ca, cb) in a[..split].chunks_exact(4).zip(b[..split].chunks_exact(4)) {
        let d0 = ca[0] - cb[0];
        let d1 = ca[1] - cb[1];
        let d2 = ca[2] - cb[2];
        let d3 = ca[3] - cb[3];
        acc0 = acc0 + d0 * d0;
        acc1 = acc1 + d1 * d1;
        acc2 = acc2 + d2 * d2;
        acc3 = acc3 + d3 * d3;
    }

    let mut total = (acc0 + acc1) + (acc2 + acc3);
    for (&x, &y) in a[split..].iter().zip(&b[split..]) {
        let d = x - y;
        total = total + d * d;
    }
    total
}

/// `|Y_j|^2` for every row of the flat row-major matrix `y`. Parallel over
/// rows; computed once per call and read-only thereafter.
pub(crate) fn row_sqnorms<T: Scalar>(y: &[T], dim: usize) -> Vec<T> {
    y.par_chunks(dim)
        .map(|row| row.iter().fold(T::zero(), |acc, &v| acc + v * v))
        .collect()
}

/// Overwrite `dist` (shape `n x k`) with the true Euclidean distances
/// `|X_i - Y_[indices[i, t]]|`, in the order the index table dictates.
/// Embarrassingly parallel over query rows.
pub(crate) fn exact_distances<T: Scalar>(
    x: &[T],
    y: &[T],
    dim: usize,
    k: usize,
    indices: &[i64],
    dist: &mut [T],
) {
    dist.par_chunks_mut(k)
        .zip(indices.par_chunks(k))
        .enumerate()
        .for_each(|(i, (dist_row, index_row))| {
            let xi = &x[i * dim..(i + 1) * dim];
            for (d, &j) in dist_row.iter_mut().zip(index_row) {
                debug_assert!(j != NO_INDEX);
                let yj = &y[j as usize * dim..(j as usize + 1) * dim];
                *d = squared_euclidean(xi, yj).sqrt();
            }
        });
}

/// Brute-force argkmin over full distance rows, parallel over queries.
///
/// One squared-distance evaluation per (query, reference) pair, folded
/// through the same bounded heap as the blocked kernel. Quadratic in the
/// input and GEMM-free: this is the correctness oracle for the tests and
/// the baseline the benchmarks compare against, not a production path.
///
/// Returns the flat `n x k` index table, each row sorted by ascending
/// distance (ties toward the smaller index). Panics if `k` exceeds the
/// number of reference rows; the public entry point validates this for the
/// blocked kernel.
pub fn argkmin_naive<T: Scalar>(x: &[T], y: &[T], dim: usize, k: usize) -> Vec<i64> {
    assert!(dim >= 1, "dim must be at least 1");
    assert_eq!(x.len() % dim, 0, "query matrix shape mismatch");
    assert_eq!(y.len() % dim, 0, "reference matrix shape mismatch");
    let n = x.len() / dim;
    let m = y.len() / dim;
    assert!(k >= 1 && k <= m, "k out of range");

    let mut indices = vec![NO_INDEX; n * k];
    indices.par_chunks_mut(k).enumerate().for_each(|(i, index_row)| {
        let xi = &x[i * dim..(i + 1) * dim];
        let mut dist_row = vec![T::infinity(); k];
        for j in 0..m {
            let yj = &y[j * dim..(j + 1) * dim];
            heap_push(&mut dist_row, index_row, squared_euclidean(xi, yj), j as i64);
        }
        simultaneous_sort(&mut dist_row, index_row);
    });
    indices
}
