//! Convergence tracking & tolerance checks for iterative solvers.

/// Stopping criteria & stats.
pub struct Convergence<T> {
    pub tol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + num_traits::Float> Convergence<T> {
    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    ///
    /// Reaching `max_iters` stops the iteration without marking it converged.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let converged = res_norm <= self.tol * res0_norm;
        (
            converged || i >= self.max_iters,
            SolveStats {
                iterations: i,
                final_residual: res_norm,
                converged,
            },
        )
    }
}
