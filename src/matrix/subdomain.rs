//! The unassembled global operator: one local (Neumann) matrix per subdomain plus the
//! local-to-global numbering. Vectors are kept in consistent local form: every rank stores the
//! value of every dof its subdomain touches, equal on all sharers.

use crate::core::traits::LinearOperator;
use crate::error::BddcError;
use crate::matrix::sparse::{CsrMatrix, SparseMatrix};
use crate::parallel::{Comm, LocalToGlobalMapping, SharingInfo, tags};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Subdomain view of a distributed operator `A = Σ_i R_iᵀ K_i R_i`.
pub struct SubdomainMatrix<C: Comm> {
    comm: C,
    local: CsrMatrix<f64>,
    mapping: LocalToGlobalMapping,
    sharing: Arc<SharingInfo>,
    n_global: usize,
    id: u64,
    state: u64,
}

impl<C: Comm> SubdomainMatrix<C> {
    /// Collective: determines the sharing pattern of the local dofs.
    pub fn new(
        comm: C,
        mapping: LocalToGlobalMapping,
        local: CsrMatrix<f64>,
        n_global: usize,
    ) -> Result<Self, BddcError> {
        if local.nrows() != local.ncols() || local.nrows() != mapping.len() {
            return Err(BddcError::InvalidInput(format!(
                "local matrix is {}x{} but the mapping has {} dofs",
                local.nrows(),
                local.ncols(),
                mapping.len()
            )));
        }
        if let Some(&g) = mapping.indices().iter().find(|&&g| g >= n_global) {
            return Err(BddcError::InvalidInput(format!(
                "global index {g} outside the {n_global} global dofs"
            )));
        }
        let sharing = Arc::new(mapping.sharing(&comm)?);
        Ok(Self {
            comm,
            local,
            mapping,
            sharing,
            n_global,
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            state: 0,
        })
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn local(&self) -> &CsrMatrix<f64> {
        &self.local
    }

    pub fn mapping(&self) -> &LocalToGlobalMapping {
        &self.mapping
    }

    pub fn sharing(&self) -> &Arc<SharingInfo> {
        &self.sharing
    }

    pub fn n_global(&self) -> usize {
        self.n_global
    }

    /// Identity of this operator; never reused.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bumped on every value update.
    pub fn state(&self) -> u64 {
        self.state
    }

    /// Change the local values in place (same pattern).
    pub fn update_values<F: FnOnce(&mut [f64])>(&mut self, f: F) {
        f(self.local.values_mut());
        self.state += 1;
    }

    /// Sum subdomain contributions (e.g. a locally assembled right-hand side) into consistent form.
    pub fn assemble(&self, contributions: &mut [f64]) -> Result<(), BddcError> {
        self.sharing.sum_shared(&self.comm, tags::INTERFACE_SUM, contributions)
    }

    /// Local part of a replicated global vector.
    pub fn restrict(&self, global: &[f64]) -> Vec<f64> {
        self.mapping.indices().iter().map(|&g| global[g]).collect()
    }

    /// `1 / multiplicity` per local dof, the weights of the distributed inner product.
    pub fn weights(&self) -> Vec<f64> {
        self.sharing.multiplicity_weights()
    }
}

impl<C: Comm> LinearOperator for SubdomainMatrix<C> {
    fn local_len(&self) -> usize {
        self.local.nrows()
    }

    fn apply(&self, x: &[f64], y: &mut [f64]) -> Result<(), BddcError> {
        self.local.spmv(x, y);
        self.assemble(y)
    }
}
