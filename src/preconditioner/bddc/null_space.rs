//! Near null space correction of the constrained Neumann solve.
//!
//! A floating subdomain whose kernel is not fully controlled by the primal constraints has a
//! singular Neumann system. When the kernel `N` of `K` is supplied, the part `N'` of it that
//! the constraints leave free (`C N' = 0`) is split off: the top-left block becomes
//! `K + σ N' N'ᵀ`, and right-hand sides and solutions are projected onto `N'^⊥`. For a
//! compatible right-hand side the regularized system returns the minimum-norm solution of the
//! singular one.

use crate::error::BddcError;
use crate::matrix::dense::{gemv, gemv_t, max_abs, orthonormalize, symmetric_eigen};
use faer::Mat;

/// Relative size of `‖K n‖∞` below which `n` counts as a kernel vector.
const KERNEL_TOL: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq)]
pub struct NullSpaceCorrection {
    basis: Mat<f64>,
    sigma: f64,
}

impl NullSpaceCorrection {
    /// Build the correction for the dense subdomain matrix `k` and the constraint rows `c`.
    ///
    /// # Arguments
    /// * `k` - local Neumann matrix
    /// * `vectors` - near null space in local numbering, need not be orthonormal
    /// * `c` - primal constraints, one row each
    ///
    /// # Returns
    /// `None` when the constraints already control every supplied direction. Fails with
    /// [`BddcError::InvalidInput`] when a vector has the wrong length or is not in the kernel.
    pub fn build(k: &Mat<f64>, vectors: &[Vec<f64>], c: &Mat<f64>) -> Result<Option<Self>, BddcError> {
        let n = k.nrows();
        if let Some((j, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != n) {
            return Err(BddcError::InvalidInput(format!(
                "near null space vector {j} has length {}, subdomain has {n} dofs",
                v.len()
            )));
        }
        let scale = max_abs(k);
        let q = orthonormalize(vectors.to_vec(), 1e-10);
        let mut kq = vec![0.0; n];
        for (j, v) in q.iter().enumerate() {
            gemv(k, v, &mut kq);
            let r = kq.iter().fold(0.0f64, |m, x| m.max(x.abs()));
            if r > KERNEL_TOL * scale.max(f64::MIN_POSITIVE) {
                return Err(BddcError::InvalidInput(format!(
                    "near null space direction {j} is not in the kernel: ‖K n‖∞ = {r:e}"
                )));
            }
        }
        let free = free_directions(&q, c)?;
        if free.is_empty() {
            return Ok(None);
        }
        let basis = Mat::from_fn(n, free.len(), |i, j| free[j][i]);
        let sigma = if scale > 0.0 { scale } else { 1.0 };
        Ok(Some(Self { basis, sigma }))
    }

    /// Number of directions split off.
    pub fn dim(&self) -> usize {
        self.basis.ncols()
    }

    /// Orthonormal basis of the free directions, one column each.
    pub fn basis(&self) -> &Mat<f64> {
        &self.basis
    }

    /// Add `σ N' N'ᵀ` to the leading `n × n` block of `a`.
    pub fn regularize(&self, a: &mut Mat<f64>) {
        let n = self.basis.nrows();
        assert!(a.nrows() >= n && a.ncols() >= n, "matrix smaller than the null space vectors");
        let bt = self.basis.transpose().to_owned();
        let nnt = &self.basis * &bt;
        for j in 0..n {
            for i in 0..n {
                a[(i, j)] += self.sigma * nnt[(i, j)];
            }
        }
    }

    /// `x ← x − N' N'ᵀ x` on the leading `n` entries of `x`.
    pub fn project(&self, x: &mut [f64]) {
        let n = self.basis.nrows();
        let mut h = vec![0.0; self.dim()];
        gemv_t(&self.basis, &x[..n], &mut h);
        let mut nh = vec![0.0; n];
        gemv(&self.basis, &h, &mut nh);
        for (xi, d) in x[..n].iter_mut().zip(nh) {
            *xi -= d;
        }
    }
}

/// Span of `q` left free by the constraint rows `c`: eigenvectors of `(C Q)ᵀ (C Q)` with a
/// negligible eigenvalue, mapped back through `Q`.
fn free_directions(q: &[Vec<f64>], c: &Mat<f64>) -> Result<Vec<Vec<f64>>, BddcError> {
    if q.is_empty() || c.nrows() == 0 {
        return Ok(q.to_vec());
    }
    let n = c.ncols();
    let qm = Mat::from_fn(n, q.len(), |i, j| q[j][i]);
    let cq = c * &qm;
    let cq_t = cq.transpose().to_owned();
    let g = &cq_t * &cq;
    let (values, vectors) = symmetric_eigen(&g)?;
    let top = values.last().copied().unwrap_or(0.0).max(1.0);
    let free: Vec<Vec<f64>> = values
        .iter()
        .enumerate()
        .filter(|&(_, &l)| l <= 1e-10 * top)
        .map(|(j, _)| {
            let w: Vec<f64> = vectors.col(j).iter().copied().collect();
            let mut v = vec![0.0; n];
            gemv(&qm, &w, &mut v);
            v
        })
        .collect();
    Ok(orthonormalize(free, 1e-10))
}
