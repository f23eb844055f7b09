//! Width-specialized GEMM adapter.
//!
//! The cross-term of the reduced distance, `-2 * X_tile * Y_tile^T`, is the
//! single hottest operation in the kernel and is delegated wholesale to
//! `matrixmultiply`'s packed BLAS-style routines. The [`Scalar`] trait pins
//! the routine per float width at compile time, so the generic kernel
//! monomorphizes to a direct `sgemm`/`dgemm` call with no runtime dispatch
//! in the inner loops.

use num_traits::Float;

mod sealed {
    pub trait Sealed {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}

/// Floating-point element type the kernel operates on.
///
/// Implemented for exactly `f32` and `f64`, the two widths with a backing
/// GEMM. The trait is sealed; the blanket bounds (`Float + Send + Sync`) are
/// what the drivers and rayon need.
pub trait Scalar: Float + Send + Sync + sealed::Sealed + 'static {
    /// Raw strided GEMM, `C <- alpha * A * B + beta * C`, with BLAS
    /// semantics: `A` is `m x k`, `B` is `k x n`, `C` is `m x n`, and each
    /// operand is addressed through an explicit (row, column) stride pair.
    ///
    /// # Safety
    ///
    /// Every element reachable through the stride arithmetic must lie within
    /// the allocation behind the corresponding pointer, and `c` must not
    /// alias `a` or `b`.
    #[allow(clippy::too_many_arguments)]
    unsafe fn gemm_raw(
        m: usize,
        k: usize,
        n: usize,
        alpha: Self,
        a: *const Self,
        rsa: isize,
        csa: isize,
        b: *const Self,
        rsb: isize,
        csb: isize,
        beta: Self,
        c: *mut Self,
        rsc: isize,
        csc: isize,
    );
}

impl Scalar for f32 {
    #[allow(clippy::too_many_arguments)]
    unsafe fn gemm_raw(
        m: usize,
        k: usize,
        n: usize,
        alpha: Self,
        a: *const Self,
        rsa: isize,
        csa: isize,
        b: *const Self,
        rsb: isize,
        csb: isize,
        beta: Self,
        c: *mut Self,
        rsc: isize,
        csc: isize,
    ) {
        matrixmultiply::sgemm(m, k, n, alpha, a, rsa, csa, b, rsb, csb, beta, c, rsc, csc);
    }
}

impl Scalar for f64 {
    #[allow(clippy::too_many_arguments)]
    unsafe fn gemm_raw(
        m: usize,
        k: usize,
        n: usize,
        alpha: Self,
        a: *const Self,
        rsa: isize,
        csa: isize,
        b: *const Self,
        rsb: isize,
        csb: isize,
        beta: Self,
        c: *mut Self,
        rsc: isize,
        csc: isize,
    ) {
        matrixmultiply::dgemm(m, k, n, alpha, a, rsa, csa, b, rsb, csb, beta, c, rsc, csc);
    }
}

/// `C <- alpha * A * B^T` for row-major `A (p x d)`, `B (q x d)`, `C (p x q)`.
///
/// `B^T` is expressed through strides (row stride 1, column stride `d`)
/// rather than materialized; `beta = 0` so `c`'s prior contents are ignored.
/// `c` may be longer than `p * q`; only the leading `p * q` elements are
/// written, which lets callers reuse a max-sized scratch buffer for short
/// remainder tiles.
pub(crate) fn gemm_nt<T: Scalar>(alpha: T, a: &[T], b: &[T], c: &mut [T], p: usize, d: usize, q: usize) {
    assert_eq!(a.len(), p * d, "lhs tile shape mismatch");
    assert_eq!(b.len(), q * d, "rhs tile shape mismatch");
    assert!(c.len() >= p * q, "output tile too small");
    if p == 0 || q == 0 || d == 0 {
        return;
    }
    // SAFETY: the asserts above bound every reachable element. For A the
    // strides (d, 1) reach at most (p-1)*d + (d-1) < p*d; for B^T the strides
    // (1, d) reach at most (d-1) + (q-1)*d < q*d; for C the strides (q, 1)
    // reach at most (p-1)*q + (q-1) < p*q. The three slices are distinct
    // borrows, so no aliasing.
    unsafe {
        T::gemm_raw(
            p,
            d,
            q,
            alpha,
            a.as_ptr(),
            d as isize,
            1,
            b.as_ptr(),
            1,
            d as isize,
            T::zero(),
            c.as_mut_ptr(),
            q as isize,
            1,
        );
    }
}
