//! Core linear-algebra traits for bddc.

use crate::error::BddcError;

/// Sparsity pattern of a single row.
pub trait RowPattern {
    /// Column indices of the stored entries of row `i`.
    fn row_indices(&self, i: usize) -> &[usize];
}

/// A (possibly distributed) linear operator acting on local representations.
///
/// Applying it may communicate, so it is fallible.
pub trait LinearOperator {
    /// Local length of the vectors the operator acts on.
    fn local_len(&self) -> usize;
    /// Compute y = A · x.
    fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), BddcError>;
}

/// Inner products & norms.
pub trait InnerProduct<V: ?Sized> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd + From<f64>;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Result<Self::Scalar, BddcError>;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Result<Self::Scalar, BddcError>;
}
