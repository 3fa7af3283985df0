//! Local Dirichlet and constrained Neumann solvers and the coarse basis.
//!
//! The Neumann problem of a subdomain is made nonsingular by the primal constraints:
//!
//! ```text
//! [ K  Cᵀ ] [ x ]   [ f ]
//! [ C  0  ] [ μ ] = [ g ]
//! ```
//!
//! Column `k` of the coarse basis `Φ` solves it with `f = 0`, `g = e_k`; the local coarse
//! matrix is `Φᵀ K Φ`. A supplied near null space left free by the constraints is split off
//! the Neumann block (see [`NullSpaceCorrection`]).

use super::benign::BenignSpace;
use super::constraints::ConstraintSet;
use super::null_space::NullSpaceCorrection;
use super::sub_schurs::SubSchurs;
use crate::error::BddcError;
use crate::matrix::CsrMatrix;
use crate::matrix::dense::{gemv_t, max_abs};
use crate::solver::LuSolver;
use faer::Mat;
#[cfg(feature = "rayon")]
use rayon::prelude::*;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct LocalSolvers {
    n_local: usize,
    interior: Vec<usize>,
    dirichlet: Option<Arc<LuSolver>>,
    neumann: Option<LuSolver>,
    constraints: Mat<f64>,
    near_null_space: Vec<Vec<f64>>,
    null_space: Option<NullSpaceCorrection>,
    phi: Mat<f64>,
    coarse_local: Mat<f64>,
}

impl LocalSolvers {
    pub fn new(n_local: usize) -> Self {
        Self {
            n_local,
            interior: Vec::new(),
            dirichlet: None,
            neumann: None,
            constraints: Mat::zeros(0, n_local),
            near_null_space: Vec::new(),
            null_space: None,
            phi: Mat::zeros(n_local, 0),
            coarse_local: Mat::zeros(0, 0),
        }
    }

    /// Kernel directions of the local matrix, in local numbering, used to correct the
    /// Neumann solve when the constraints leave them free.
    pub fn with_near_null_space(mut self, vectors: Vec<Vec<f64>>) -> Self {
        self.near_null_space = vectors;
        self
    }

    /// Reuse the interior factor of `sub_schurs` for the Dirichlet problem and factor the
    /// constrained Neumann problem.
    pub fn setup(
        &mut self,
        rank: usize,
        k: &CsrMatrix<f64>,
        sub_schurs: &SubSchurs,
        constraints: &ConstraintSet,
        needs_dirichlet: bool,
        needs_neumann: bool,
        pivot_tol: f64,
    ) -> Result<(), BddcError> {
        self.interior = sub_schurs.interior().to_vec();
        if needs_dirichlet {
            let factor = sub_schurs
                .interior_factor()
                .ok_or(BddcError::Unsupported("Dirichlet solver requested before the interior factorization"))?;
            self.dirichlet = Some(Arc::clone(factor));
        }
        self.constraints = constraints.matrix(self.n_local);
        if needs_neumann {
            let n = self.n_local;
            let p = self.constraints.nrows();
            let kd = k.to_dense();
            let c = &self.constraints;
            let mut saddle = Mat::from_fn(n + p, n + p, |i, j| match (i < n, j < n) {
                (true, true) => kd[(i, j)],
                (true, false) => c[(j - n, i)],
                (false, true) => c[(i - n, j)],
                (false, false) => 0.0,
            });
            self.null_space = if self.near_null_space.is_empty() {
                None
            } else {
                NullSpaceCorrection::build(&kd, &self.near_null_space, c)?
            };
            if let Some(ns) = self.null_space.as_ref() {
                ns.regularize(&mut saddle);
                log::debug!("rank {rank}: {} near null space directions split off the Neumann problem", ns.dim());
            }
            let lu = LuSolver::factor(&saddle, pivot_tol).map_err(|e| e.singular(rank, "Neumann problem"))?;
            self.neumann = Some(lu);
            log::debug!("rank {rank}: constrained Neumann problem of order {} ({p} constraints)", n + p);
        }
        Ok(())
    }

    /// Coarse basis and local coarse matrix. With `check`, verifies `C Φ = I` and
    /// `K Φ + Cᵀ Λ = 0`.
    pub fn setup_correction(&mut self, rank: usize, k: &CsrMatrix<f64>, check: bool) -> Result<&Mat<f64>, BddcError> {
        let lu = self
            .neumann
            .as_ref()
            .ok_or(BddcError::Unsupported("coarse basis requested without a Neumann solver"))?;
        let n = self.n_local;
        let p = self.constraints.nrows();
        let solve = |kk: usize| {
            let mut rhs = vec![0.0; n + p];
            rhs[n + kk] = 1.0;
            lu.solve_in_place(&mut rhs);
            if let Some(ns) = self.null_space.as_ref() {
                ns.project(&mut rhs);
            }
            rhs
        };
        #[cfg(feature = "rayon")]
        let columns: Vec<Vec<f64>> = (0..p).into_par_iter().map(solve).collect();
        #[cfg(not(feature = "rayon"))]
        let columns: Vec<Vec<f64>> = (0..p).map(solve).collect();

        self.phi = Mat::from_fn(n, p, |i, j| columns[j][i]);
        let kd = k.to_dense();
        let kphi = &kd * &self.phi;
        let phi_t = self.phi.transpose().to_owned();
        self.coarse_local = &phi_t * &kphi;

        if check {
            let lambda = Mat::from_fn(p, p, |i, j| columns[j][n + i]);
            self.check_correction(&kd, &kphi, &lambda)?;
            log::debug!("rank {rank}: coarse basis check passed");
        }
        Ok(&self.coarse_local)
    }

    fn check_correction(&self, kd: &Mat<f64>, kphi: &Mat<f64>, lambda: &Mat<f64>) -> Result<(), BddcError> {
        let tol = 1e-8;
        let cphi = &self.constraints * &self.phi;
        for i in 0..cphi.nrows() {
            for j in 0..cphi.ncols() {
                let want = if i == j { 1.0 } else { 0.0 };
                if (cphi[(i, j)] - want).abs() > tol {
                    return Err(BddcError::Check(format!(
                        "C Φ differs from the identity at ({i}, {j}): {}",
                        cphi[(i, j)]
                    )));
                }
            }
        }
        let c_t = self.constraints.transpose().to_owned();
        let ctl = &c_t * lambda;
        let scale = max_abs(kd).max(1.0) * (1.0 + max_abs(&self.phi));
        for i in 0..kphi.nrows() {
            for j in 0..kphi.ncols() {
                let r = kphi[(i, j)] + ctl[(i, j)];
                if r.abs() > tol * scale {
                    return Err(BddcError::Check(format!(
                        "K Φ + Cᵀ Λ is {r} at ({i}, {j})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Constrained Neumann solve with zero constraint values: the dual part of the correction.
    pub fn neumann_solve(&self, f: &[f64]) -> Vec<f64> {
        let Some(lu) = self.neumann.as_ref() else {
            return vec![0.0; self.n_local];
        };
        let mut rhs = f.to_vec();
        rhs.resize(lu.dim(), 0.0);
        if let Some(ns) = self.null_space.as_ref() {
            ns.project(&mut rhs);
        }
        lu.solve_in_place(&mut rhs);
        rhs.truncate(self.n_local);
        if let Some(ns) = self.null_space.as_ref() {
            ns.project(&mut rhs);
        }
        rhs
    }

    /// Interior (Dirichlet) solve in interior numbering, keeping the benign component out.
    pub fn dirichlet_solve(&self, b: &mut [f64], benign: Option<&BenignSpace>) {
        if let Some(lu) = self.dirichlet.as_ref() {
            if let Some(s) = benign {
                s.remove_component(b);
            }
            lu.solve_in_place(b);
            if let Some(s) = benign {
                s.remove_component(b);
            }
        }
    }

    pub fn interior(&self) -> &[usize] {
        &self.interior
    }

    pub fn null_space(&self) -> Option<&NullSpaceCorrection> {
        self.null_space.as_ref()
    }

    pub fn phi(&self) -> &Mat<f64> {
        &self.phi
    }

    pub fn coarse_local(&self) -> &Mat<f64> {
        &self.coarse_local
    }

    /// `Φᵀ f`
    pub fn phi_transpose_apply(&self, f: &[f64]) -> Vec<f64> {
        let mut v = vec![0.0; self.phi.ncols()];
        gemv_t(&self.phi, f, &mut v);
        v
    }

    /// `x += Φ u`
    pub fn phi_apply_add(&self, u: &[f64], x: &mut [f64]) {
        for (j, &uj) in u.iter().enumerate() {
            if uj != 0.0 {
                for (i, xi) in x.iter_mut().enumerate() {
                    *xi += self.phi[(i, j)] * uj;
                }
            }
        }
    }

    /// Drop the factors; the near null space stays.
    pub fn reset(&mut self) {
        let vectors = std::mem::take(&mut self.near_null_space);
        *self = Self::new(self.n_local).with_near_null_space(vectors);
    }
}
