//! Inner product on unassembled (subdomain-local) vector representations: each rank
//! holds its local copy of every dof it touches, so shared entries are weighted by the inverse
//! of their multiplicity before the global reduction.

use crate::core::traits::InnerProduct;
use crate::error::BddcError;
use crate::parallel::Comm;

/// Distributed inner product over subdomain-local vectors.
///
/// `weights[i]` is the share of local entry `i` in the global sum, `1/count` for a dof shared
/// by `count` subdomains (and `1/2` for a Lagrange multiplier held by both its subdomains).
pub struct DistributedInnerProduct<'a, C: Comm> {
    /// Communicator used for the global reduction.
    pub comm: &'a C,
    /// Per-entry weights.
    pub weights: &'a [f64],
}

impl<'a, C: Comm> DistributedInnerProduct<'a, C> {
    pub fn new(comm: &'a C, weights: &'a [f64]) -> Self {
        Self { comm, weights }
    }
}

impl<'a, C: Comm> InnerProduct<[f64]> for DistributedInnerProduct<'a, C> {
    type Scalar = f64;

    /// Computes the weighted distributed dot product of two local slices.
    fn dot(&self, x: &[f64], y: &[f64]) -> Result<f64, BddcError> {
        assert_eq!(x.len(), y.len(), "Vectors must have the same length");
        assert_eq!(x.len(), self.weights.len(), "Weights must match the vector length");
        let local: f64 = x
            .iter()
            .zip(y)
            .zip(self.weights)
            .map(|((&a, &b), &w)| w * a * b)
            .sum();
        self.comm.all_reduce_sum(local)
    }

    /// Computes the distributed Euclidean norm of a local slice.
    fn norm(&self, x: &[f64]) -> Result<f64, BddcError> {
        Ok(self.dot(x, x)?.max(0.0).sqrt())
    }
}
