//! # argkmin — blocked, parallel, GEMM-accelerated exact k-NN
//!
//! For a query matrix `X (n x d)` and a reference matrix `Y (m x d)`, find
//! for every row of `X` the indices (and optionally the distances) of its k
//! nearest rows of `Y` under Euclidean distance. Exact answers, with no index
//! structures and no approximation.
//!
//! ## Architecture Overview
//!
//! ### Reduced distances
//!
//! For a fixed query row the ordering of `|x - y_j|^2` across `j` is the
//! ordering of `g(j) = -2<x, y_j> + |y_j|^2`, because `|x|^2` is constant
//! across the row. The kernel ranks candidates by `g` throughout: the
//! `-2<x, y_j>` cross-terms for a whole tile pair come out of one
//! matrix-matrix multiply, which turns the distance computation into a
//! level-3 BLAS problem instead of n*m separate dot products. True distances
//! are recomputed from the winning indices at the end (see below).
//!
//! ### Blocked evaluation
//!
//! X and Y are cut into row tiles of at most `chunk_size` rows. One
//! (X-tile, Y-tile) step touches a `p x q` scratch block, `q` cached squared
//! norms, and `p` bounded heaps of k entries, a working set that fits in
//! cache and is independent of n and m. Per query row a max-heap of size k,
//! keyed on the reduced distance, rejects a losing candidate with a single
//! comparison against the root.
//!
//! ### Two parallel axes
//!
//! `chunk_on_X` runs the outer X-tile loop in parallel: every output row
//! belongs to exactly one tile, so workers write into disjoint slices of the
//! output with no synchronization at all. `chunk_on_Y` keeps the X loop
//! serial and parallelizes over Y-tiles instead, which costs a per-worker
//! reduction into shared heaps but keeps every core busy when n is small.
//! The `auto` strategy picks between them from n, the chunk size, and the
//! rayon pool width.
//!
//! ### Exact recomputation
//!
//! `g` subtracts one large value from another; for near-identical vectors it
//! loses most of its significant bits. When distances are requested, a final
//! embarrassingly-parallel pass recomputes `|x - y|` per winning pair with a
//! fused squared-difference loop, which has no cancellation problem.
//!
//! ## Example
//!
//! ```
//! use argkmin::{argkmin, ArgKminParams};
//!
//! // Three 2-d queries against four references, flat row-major storage.
//! let x = [0.0f32, 0.0, 1.0, 1.0, 4.0, 0.0];
//! let y = [0.0f32, 0.1, 1.0, 1.0, 3.9, 0.0, -2.0, -2.0];
//!
//! let params = ArgKminParams { return_distance: true, ..Default::default() };
//! let result = argkmin(&x, &y, 2, 2, &params).unwrap();
//!
//! assert_eq!(result.indices_row(0), &[0, 1]);
//! assert_eq!(result.indices_row(1), &[1, 0]);
//! assert_eq!(result.indices_row(2), &[2, 1]);
//! ```

mod chunk;
mod exact;
mod gemm;
mod heap;

pub use exact::argkmin_naive;
pub use gemm::Scalar;

use std::str::FromStr;
use thiserror::Error;

/// Default tile row count for both axes.
pub const DEFAULT_CHUNK_SIZE: usize = 256;

/// Smallest admitted tile row count; smaller requests are clamped up.
pub const MIN_CHUNK_SIZE: usize = 20;

/// Errors reported by [`argkmin`]. All of them are input-validation
/// failures: after validation the kernel runs to completion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgKminError {
    #[error("k must be at least 1")]
    ZeroK,
    #[error("k ({k}) exceeds the number of reference rows ({m})")]
    KTooLarge { k: usize, m: usize },
    #[error("matrices must have at least one column")]
    ZeroDim,
    #[error("query and reference matrices must be non-empty")]
    EmptyInput,
    #[error("matrix of {len} elements is not a whole number of {dim}-wide rows")]
    RaggedMatrix { len: usize, dim: usize },
    #[error("unknown strategy `{0}`, expected `auto`, `chunk_on_X` or `chunk_on_Y`")]
    UnknownStrategy(String),
}

/// Which axis carries the parallel loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// Heuristic choice: `ChunkOnX` when n is large enough to give every
    /// worker several X-tiles (`4 * chunk_size * threads < n`), `ChunkOnY`
    /// otherwise.
    #[default]
    Auto,
    /// Force the reduction-free X-axis driver.
    ChunkOnX,
    /// Force the Y-axis driver with per-worker reduction.
    ChunkOnY,
}

impl FromStr for Strategy {
    type Err = ArgKminError;

    fn from_str(s: &str) -> Result<Self, ArgKminError> {
        match s {
            "auto" => Ok(Strategy::Auto),
            "chunk_on_X" => Ok(Strategy::ChunkOnX),
            "chunk_on_Y" => Ok(Strategy::ChunkOnY),
            other => Err(ArgKminError::UnknownStrategy(other.to_owned())),
        }
    }
}

/// Tuning knobs for [`argkmin`]. The defaults are the documented contract:
/// 256-row tiles, automatic strategy selection, indices only.
#[derive(Debug, Clone, Copy)]
pub struct ArgKminParams {
    /// Upper bound on tile rows for both axes, clamped to
    /// [`MIN_CHUNK_SIZE`]. Affects performance only, never results.
    pub chunk_size: usize,
    /// Parallelization axis, or [`Strategy::Auto`] to let the heuristic
    /// decide.
    pub strategy: Strategy,
    /// When set, the true Euclidean distances are recomputed and returned
    /// alongside the indices.
    pub return_distance: bool,
}

impl Default for ArgKminParams {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            strategy: Strategy::Auto,
            return_distance: false,
        }
    }
}

/// Result tables of one [`argkmin`] call, stored flat in row-major `n x k`.
#[derive(Debug, Clone)]
pub struct ArgKminResult<T> {
    n: usize,
    k: usize,
    indices: Vec<i64>,
    distances: Option<Vec<T>>,
}

impl<T: Scalar> ArgKminResult<T> {
    /// Number of query rows.
    pub fn n(&self) -> usize {
        self.n
    }

    /// Neighbors per query row.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Flat `n x k` index table: row i holds the indices of the k nearest
    /// reference rows, by ascending distance (ties toward the smaller
    /// index).
    pub fn indices(&self) -> &[i64] {
        &self.indices
    }

    /// Flat `n x k` distance table, present when the call asked for
    /// distances. Non-decreasing along each row.
    pub fn distances(&self) -> Option<&[T]> {
        self.distances.as_deref()
    }

    /// The index row for query `i`.
    pub fn indices_row(&self, i: usize) -> &[i64] {
        &self.indices[i * self.k..(i + 1) * self.k]
    }

    /// The distance row for query `i`. Panics if distances were not
    /// requested.
    pub fn distances_row(&self, i: usize) -> &[T] {
        let distances = self.distances.as_ref().expect("distances were not requested");
        &distances[i * self.k..(i + 1) * self.k]
    }

    /// Consume the result, yielding the flat tables.
    pub fn into_parts(self) -> (Vec<i64>, Option<Vec<T>>) {
        (self.indices, self.distances)
    }
}

/// Exact k-nearest-neighbors of every row of `x` among the rows of `y`.
///
/// `x` and `y` are contiguous row-major matrices passed as flat slices with
/// an explicit column count `dim`; `x.len() / dim` and `y.len() / dim` are
/// the row counts n and m. Requires `1 <= k <= m`.
///
/// The result is deterministic for fixed inputs: it does not depend on the
/// strategy, the chunk size, or the number of threads (equal distances
/// resolve toward the smaller reference index).
///
/// # Errors
///
/// [`ArgKminError`] on any violated precondition; see the variants. The
/// call either fails validation up front or runs to completion; no partial
/// output is ever observable.
pub fn argkmin<T: Scalar>(
    x: &[T],
    y: &[T],
    dim: usize,
    k: usize,
    params: &ArgKminParams,
) -> Result<ArgKminResult<T>, ArgKminError> {
    if dim == 0 {
        return Err(ArgKminError::ZeroDim);
    }
    if x.is_empty() || y.is_empty() {
        return Err(ArgKminError::EmptyInput);
    }
    if x.len() % dim != 0 {
        return Err(ArgKminError::RaggedMatrix { len: x.len(), dim });
    }
    if y.len() % dim != 0 {
        return Err(ArgKminError::RaggedMatrix { len: y.len(), dim });
    }
    let n = x.len() / dim;
    let m = y.len() / dim;
    if k == 0 {
        return Err(ArgKminError::ZeroK);
    }
    if k > m {
        return Err(ArgKminError::KTooLarge { k, m });
    }

    let chunk = params.chunk_size.max(MIN_CHUNK_SIZE);

    // Output tables start in the heap sentinel state; every slot is
    // overwritten before return since k <= m guarantees k accepted
    // candidates per row.
    let mut indices = vec![heap::NO_INDEX; n * k];
    let mut dist = vec![T::infinity(); n * k];

    let y_sqnorms = exact::row_sqnorms(y, dim);

    let threads = rayon::current_num_threads();
    let on_x = match params.strategy {
        Strategy::ChunkOnX => true,
        Strategy::ChunkOnY => false,
        Strategy::Auto => 4 * chunk * threads < n,
    };

    if on_x {
        chunk::chunk_on_x(x, y, dim, k, &y_sqnorms, chunk, &mut indices);
    } else {
        chunk::chunk_on_y(x, y, dim, k, &y_sqnorms, chunk, &mut dist, &mut indices);
    }

    let distances = if params.return_distance {
        exact::exact_distances(x, y, dim, k, &indices, &mut dist);
        Some(dist)
    } else {
        None
    };

    Ok(ArgKminResult { n, k, indices, distances })
}
