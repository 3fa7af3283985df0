//! Dense LU factorization with partial pivoting, on top of Faer's `PartialPivLu`.
//!
//! The factorization reports a numerically zero pivot of `U` as an error, which is how
//! singular local or coarse problems are detected during setup. The factor is kept for any
//! number of right-hand sides.
//!
//! Faer 0.22's `FullPivLu` returns NaN on systems of order 16 and above, so the complete
//! pivoting variant is not used.
//!
//! # References
//! - Faer documentation: https://github.com/sarah-ek/faer-rs
//! - Golub & Van Loan, Matrix Computations, §3.4

use crate::error::BddcError;
use crate::matrix::dense::max_abs;
use faer::linalg::solvers::{PartialPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};

/// `P A = L U` with unit lower `L`.
#[derive(Debug, Clone)]
pub struct LuSolver {
    factor: PartialPivLu<f64>,
    dim: usize,
}

impl LuSolver {
    /// Factor a square matrix.
    ///
    /// # Arguments
    /// * `a` - Square matrix to factor
    /// * `tol` - Relative pivot tolerance
    ///
    /// # Returns
    /// * `Err(BddcError::ZeroPivot(k))` when `|U_kk| <= tol · max|A|` for the first such `k`
    /// * `Err(BddcError::InvalidInput)` for a non-square matrix
    pub fn factor(a: &Mat<f64>, tol: f64) -> Result<Self, BddcError> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(BddcError::InvalidInput(format!(
                "LU of a non-square {}x{} matrix",
                n,
                a.ncols()
            )));
        }
        let scale = max_abs(a);
        let factor = a.partial_piv_lu();
        let u = factor.U();
        if let Some(k) = (0..n).find(|&k| !(u[(k, k)].abs() > tol * scale)) {
            return Err(BddcError::ZeroPivot(k));
        }
        Ok(Self { factor, dim: n })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Overwrite `b` with `A⁻¹ b`.
    ///
    /// # Panics
    /// Panics if `b` does not have the order of the factored matrix.
    pub fn solve_in_place(&self, b: &mut [f64]) {
        assert_eq!(b.len(), self.dim, "right-hand side has the wrong length");
        let n = self.dim;
        self.factor
            .solve_in_place_with_conj(Conj::No, MatMut::from_column_major_slice_mut(b, n, 1));
    }

    pub fn solve(&self, b: &[f64]) -> Vec<f64> {
        let mut x = b.to_vec();
        self.solve_in_place(&mut x);
        x
    }

    /// `A⁻¹ B` for all columns at once.
    pub fn solve_mat(&self, b: &Mat<f64>) -> Mat<f64> {
        assert_eq!(b.nrows(), self.dim, "right-hand side has the wrong number of rows");
        let mut x = b.clone();
        self.factor.solve_in_place_with_conj(Conj::No, x.as_mut());
        x
    }
}
