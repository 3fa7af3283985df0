//! Preconditioners for linear solvers.
//!
//! This module defines the Preconditioner trait and the BDDC/FETI-DP domain-decomposition
//! family built on it.

use crate::error::BddcError;

/// A preconditioner M ≈ A⁻¹.
pub trait Preconditioner<M, V> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r
    fn apply(&self, r: &V, z: &mut V) -> Result<(), BddcError>;
    /// Optionally: setup/factorize from A
    fn setup(&mut self, _a: &M) -> Result<(), BddcError> {
        Ok(())
    }
}

pub mod bddc;

pub use bddc::fetidp::{FetidpMat, FetidpPc, FetidpPcKind};
pub use bddc::{Bddc, SetupState};
