//! Vector and sparse kernels dispatched on the executor.
//!
//! Every kernel takes the executor that owns the buffers. Parallel host executors fan out over
//! rayon's global pool; every other executor (serial host, emulated device) runs the sequential
//! loop. Reductions always return a host value, so on a device executor they include the
//! implicit device→host copy of one scalar.

use crate::core::traits::Scalar;
use crate::executor::Executor;
use crate::matrix::CsrView;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Computes the dot product of two vectors: `x^T y`.
pub fn dot<T: Scalar>(exec: &Executor, x: &[T], y: &[T]) -> T {
    debug_assert_eq!(x.len(), y.len(), "Vectors must have the same length");
    #[cfg(feature = "rayon")]
    if exec.is_parallel() {
        return x
            .par_iter()
            .zip(y.par_iter())
            .map(|(xi, yi)| *xi * *yi)
            .reduce(T::zero, |acc, v| acc + v);
    }
    let _ = exec;
    x.iter()
        .zip(y.iter())
        .map(|(xi, yi)| *xi * *yi)
        .fold(T::zero(), |acc, v| acc + v)
}

/// Computes the Euclidean norm of a vector: `||x||_2`.
pub fn norm<T: Scalar>(exec: &Executor, x: &[T]) -> T {
    dot(exec, x, x).sqrt()
}

/// y ← y + alpha·x
pub fn axpy<T: Scalar>(exec: &Executor, alpha: T, x: &[T], y: &mut [T]) {
    #[cfg(feature = "rayon")]
    if exec.is_parallel() {
        y.par_iter_mut().zip(x.par_iter()).for_each(|(yi, xi)| *yi += alpha * *xi);
        return;
    }
    let _ = exec;
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi += alpha * *xi;
    }
}

/// y ← x + beta·y
pub fn xpby<T: Scalar>(exec: &Executor, x: &[T], beta: T, y: &mut [T]) {
    #[cfg(feature = "rayon")]
    if exec.is_parallel() {
        y.par_iter_mut().zip(x.par_iter()).for_each(|(yi, xi)| *yi = *xi + beta * *yi);
        return;
    }
    let _ = exec;
    for (yi, xi) in y.iter_mut().zip(x) {
        *yi = *xi + beta * *yi;
    }
}

/// x ← alpha·x
pub fn scale<T: Scalar>(exec: &Executor, alpha: T, x: &mut [T]) {
    #[cfg(feature = "rayon")]
    if exec.is_parallel() {
        x.par_iter_mut().for_each(|xi| *xi = *xi * alpha);
        return;
    }
    let _ = exec;
    for xi in x.iter_mut() {
        *xi = *xi * alpha;
    }
}

/// y ← A x
pub fn spmv<T: Scalar>(exec: &Executor, a: CsrView<'_, T>, x: &[T], y: &mut [T]) {
    #[cfg(feature = "rayon")]
    if exec.is_parallel() {
        a.spmv_parallel(x, y);
        return;
    }
    let _ = exec;
    a.spmv(x, y);
}

/// r ← b − A x
pub fn residual<T: Scalar>(exec: &Executor, a: CsrView<'_, T>, b: &[T], x: &[T], r: &mut [T]) {
    spmv(exec, a, x, r);
    xpby(exec, b, -T::one(), r);
}
