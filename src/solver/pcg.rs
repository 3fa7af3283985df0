//! Preconditioned Conjugate Gradient (PCG) per Saad §9.2, on distributed local vectors.
//!
//! The operator and the preconditioner act on consistent local representations; every
//! reduction goes through the supplied [`InnerProduct`], which weights shared entries so each
//! global dof is counted once.

use crate::core::traits::{InnerProduct, LinearOperator};
use crate::error::BddcError;
use crate::preconditioner::Preconditioner;
use crate::utils::convergence::{Convergence, SolveStats};

pub enum CgNormType {
    Preconditioned,
    Unpreconditioned,
    Natural,
}

pub struct PcgSolver {
    pub conv: Convergence<f64>,
    pub norm_type: CgNormType,
    pub monitor: Option<Box<dyn FnMut(usize, f64)>>,
    pub residual_history: Vec<f64>,
}

impl PcgSolver {
    pub fn new(tol: f64, max_iters: usize) -> Self {
        Self {
            conv: Convergence { tol, max_iters },
            norm_type: CgNormType::Unpreconditioned,
            monitor: None,
            residual_history: Vec::new(),
        }
    }
    pub fn with_norm(mut self, norm_type: CgNormType) -> Self {
        self.norm_type = norm_type;
        self
    }
    pub fn with_monitor<F>(mut self, f: F) -> Self
    where
        F: FnMut(usize, f64) + 'static,
    {
        self.monitor = Some(Box::new(f));
        self
    }
    pub fn clear_history(&mut self) {
        self.residual_history.clear();
    }

    fn residual_norm<I>(&self, ip: &I, r: &[f64], z: &[f64]) -> Result<f64, BddcError>
    where
        I: InnerProduct<[f64], Scalar = f64>,
    {
        Ok(match self.norm_type {
            CgNormType::Preconditioned => ip.dot(z, z)?.sqrt(),
            CgNormType::Unpreconditioned => ip.dot(r, r)?.sqrt(),
            CgNormType::Natural => ip.dot(r, z)?.abs().sqrt(),
        })
    }

    /// Solve `A x = b` starting from the given `x`.
    ///
    /// # Arguments
    /// * `a` - Distributed operator acting on consistent local vectors
    /// * `pc` - Optional preconditioner; must be symmetric positive definite
    /// * `ip` - Inner product counting every shared dof once
    /// * `b` - Local right-hand side
    /// * `x` - On input: initial guess; on output: solution
    ///
    /// # Returns
    /// * `Ok(SolveStats)` if converged or max iterations reached
    /// * `Err(BddcError::IndefiniteMatrix)` or `Err(BddcError::IndefinitePreconditioner)` on
    ///   breakdown, or the error of a failed operator or preconditioner apply
    ///
    /// # Panics
    /// If `b` or `x` does not match `a.local_len()`.
    pub fn solve<M, I>(
        &mut self,
        a: &M,
        pc: Option<&dyn Preconditioner<M, Vec<f64>>>,
        ip: &I,
        b: &[f64],
        x: &mut [f64],
    ) -> Result<SolveStats<f64>, BddcError>
    where
        M: LinearOperator,
        I: InnerProduct<[f64], Scalar = f64>,
    {
        let n = a.local_len();
        assert_eq!(b.len(), n, "right-hand side has the wrong length");
        assert_eq!(x.len(), n, "initial guess has the wrong length");

        let mut r = vec![0.0; n];
        a.apply(x, &mut r)?;
        for (ri, &bi) in r.iter_mut().zip(b) {
            *ri = bi - *ri;
        }
        let mut z = vec![0.0; n];
        match pc {
            Some(pc) => pc.apply(&r, &mut z)?,
            None => z.copy_from_slice(&r),
        }
        let mut p = z.clone();
        let mut rz = ip.dot(&r, &z)?;
        let res0 = self.residual_norm(ip, &r, &z)?;
        if let Some(ref mut monitor) = self.monitor {
            monitor(0, res0);
        }
        self.residual_history.push(res0);
        let mut stats = SolveStats {
            iterations: 0,
            final_residual: res0,
            converged: res0 == 0.0,
        };
        if stats.converged {
            return Ok(stats);
        }

        let mut ap = vec![0.0; n];
        for i in 0..self.conv.max_iters {
            a.apply(&p, &mut ap)?;
            let p_dot_ap = ip.dot(&p, &ap)?;
            if p_dot_ap <= 0.0 {
                return Err(BddcError::IndefiniteMatrix);
            }
            let alpha = rz / p_dot_ap;
            for (xj, pj) in x.iter_mut().zip(&p) {
                *xj += alpha * pj;
            }
            for (rj, apj) in r.iter_mut().zip(&ap) {
                *rj -= alpha * apj;
            }
            match pc {
                Some(pc) => pc.apply(&r, &mut z)?,
                None => z.copy_from_slice(&r),
            }
            let rz_new = ip.dot(&r, &z)?;
            let res_norm = self.residual_norm(ip, &r, &z)?;
            if let Some(ref mut monitor) = self.monitor {
                monitor(i + 1, res_norm);
            }
            self.residual_history.push(res_norm);
            let (stop, s) = self.conv.check(res_norm, res0, i + 1);
            stats = s;
            if stop {
                return Ok(stats);
            }
            let beta = rz_new / rz;
            if beta < 0.0 {
                return Err(BddcError::IndefinitePreconditioner);
            }
            for (pj, zj) in p.iter_mut().zip(&z) {
                *pj = *zj + beta * *pj;
            }
            rz = rz_new;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::wrappers::DistributedInnerProduct;
    use crate::parallel::LocalComm;
    use faer::Mat;

    struct DenseOp(Mat<f64>);

    impl LinearOperator for DenseOp {
        fn local_len(&self) -> usize {
            self.0.nrows()
        }
        fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), BddcError> {
            crate::matrix::dense::gemv(&self.0, x, y);
            Ok(())
        }
    }

    struct Diagonal(Vec<f64>);

    impl Preconditioner<DenseOp, Vec<f64>> for Diagonal {
        fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), BddcError> {
            for ((zi, ri), di) in z.iter_mut().zip(r).zip(&self.0) {
                *zi = ri / di;
            }
            Ok(())
        }
    }

    #[test]
    fn pcg_small_spd() {
        // SPD system: [[4,1],[1,3]] x = [1,2]
        let a = DenseOp(Mat::from_fn(2, 2, |i, j| [[4.0, 1.0], [1.0, 3.0]][i][j]));
        let comm = LocalComm::serial();
        let weights = [1.0, 1.0];
        let ip = DistributedInnerProduct::new(&comm, &weights);
        let pc = Diagonal(vec![4.0, 3.0]);
        let mut x = vec![0.0, 0.0];
        let stats = PcgSolver::new(1e-12, 20)
            .solve(&a, Some(&pc), &ip, &[1.0, 2.0], &mut x)
            .unwrap();
        assert!(stats.converged, "PCG did not converge");
        let expected = [0.09090909090909091, 0.6363636363636364];
        for (xi, ei) in x.iter().zip(expected.iter()) {
            assert!((xi - ei).abs() < 1e-8, "xi = {}, expected = {}", xi, ei);
        }
    }

    #[test]
    fn indefinite_operator_is_reported() {
        let a = DenseOp(Mat::from_fn(2, 2, |i, j| if i == j { [1.0, -1.0][i] } else { 0.0 }));
        let comm = LocalComm::serial();
        let weights = [1.0, 1.0];
        let ip = DistributedInnerProduct::new(&comm, &weights);
        let mut x = vec![0.0, 0.0];
        let err = PcgSolver::new(1e-12, 20).solve(&a, None, &ip, &[0.0, 1.0], &mut x);
        assert_eq!(err.unwrap_err(), BddcError::IndefiniteMatrix);
    }
}
