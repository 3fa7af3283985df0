//! Benign subspace of saddle-point subdomains.
//!
//! Interior pressure dofs have a zero diagonal and the constant pressure `n` is in the kernel
//! of the interior block. The block is regularized with `σ n nᵀ / nᵀn` (push) before it is
//! factored, interior right-hand sides are kept orthogonal to `n`, and the pressure mean `p0`
//! becomes a subdomain-local primal unknown.

use crate::error::BddcError;
use crate::matrix::dense::max_abs;
use crate::matrix::{CsrMatrix, IndexSet};
use faer::Mat;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Push,
    Pop,
}

/// Interior rows (given as positions in `interior`) whose diagonal entry is zero.
pub fn detect_saddle_point(k: &CsrMatrix<f64>, interior: &[usize]) -> IndexSet {
    interior
        .iter()
        .enumerate()
        .filter(|&(_, &i)| k.get(i, i) == 0.0)
        .map(|(pos, _)| pos)
        .collect()
}

/// Whether the indicator vector of `flagged` is in the kernel of `k_ii`:
/// `‖K_II n‖∞ ≤ tol · max|K_II|`.
pub fn check(k_ii: &Mat<f64>, flagged: &IndexSet, tol: f64) -> bool {
    let scale = max_abs(k_ii);
    (0..k_ii.nrows()).all(|i| {
        let r: f64 = flagged.iter().map(|j| k_ii[(i, j)]).sum();
        r.abs() <= tol * scale
    })
}

/// The pressure null vector of a benign subdomain, on its interior block.
#[derive(Debug, Clone, PartialEq)]
pub struct BenignSpace {
    flagged: IndexSet,
    n: Vec<f64>,
    nn: f64,
    sigma: f64,
}

impl BenignSpace {
    /// `flagged` are positions in the interior block of size `interior_len`.
    pub fn new(interior_len: usize, flagged: IndexSet, sigma: f64) -> Result<Self, BddcError> {
        let mut n = vec![0.0; interior_len];
        for j in flagged.iter() {
            *n.get_mut(j).ok_or_else(|| {
                BddcError::InvalidInput(format!("benign dof {j} outside the interior block"))
            })? = 1.0;
        }
        let nn = flagged.len() as f64;
        if nn == 0.0 {
            return Err(BddcError::InvalidInput("empty benign subspace".into()));
        }
        Ok(Self { flagged, n, nn, sigma })
    }

    /// Detect, check and build the benign space of a subdomain. `None` when the interior has
    /// no zero-diagonal rows or the candidate is not a null vector.
    pub fn detect(k: &CsrMatrix<f64>, interior: &[usize], k_ii: &Mat<f64>, tol: f64) -> Option<Self> {
        let flagged = detect_saddle_point(k, interior);
        if flagged.is_empty() {
            return None;
        }
        if !check(k_ii, &flagged, tol) {
            log::warn!(
                "{} zero-diagonal interior rows do not span a null space; benign trick not applied",
                flagged.len()
            );
            return None;
        }
        let sigma = (0..k_ii.nrows()).fold(0.0f64, |m, i| m.max(k_ii[(i, i)].abs())).max(1.0);
        Self::new(k_ii.nrows(), flagged, sigma).ok()
    }

    pub fn flagged(&self) -> &IndexSet {
        &self.flagged
    }

    pub fn null_vector(&self) -> &[f64] {
        &self.n
    }

    /// Add (push) or remove (pop) `σ n nᵀ / nᵀn` on the interior block.
    pub fn pop_or_push(&self, k_ii: &mut Mat<f64>, direction: Direction) {
        let s = match direction {
            Direction::Push => self.sigma / self.nn,
            Direction::Pop => -self.sigma / self.nn,
        };
        for i in self.flagged.iter() {
            for j in self.flagged.iter() {
                k_ii[(i, j)] += s;
            }
        }
    }

    /// Pressure mean `nᵀv / nᵀn` of an interior vector.
    pub fn get_p0(&self, v: &[f64]) -> f64 {
        self.flagged.iter().map(|j| v[j]).sum::<f64>() / self.nn
    }

    /// `v += p0 · n`
    pub fn set_p0(&self, v: &mut [f64], p0: f64) {
        for j in self.flagged.iter() {
            v[j] += p0;
        }
    }

    /// Remove the `n` component of an interior vector; returns the removed mean.
    pub fn remove_component(&self, v: &mut [f64]) -> f64 {
        let p0 = self.get_p0(v);
        self.set_p0(v, -p0);
        p0
    }

    /// Coefficients of the pressure-mean constraint over the interior block.
    pub fn constraint_coeffs(&self) -> Vec<f64> {
        self.flagged.iter().map(|_| 1.0 / self.nn).collect()
    }
}
