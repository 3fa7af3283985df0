use thiserror::Error;

// Unified error type for bddc

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BddcError {
    /// Processes disagree on the interface (component membership, marks, primal keys).
    #[error("topology inconsistency on rank {rank} during {step}: {detail}")]
    Topology {
        rank: usize,
        step: &'static str,
        detail: String,
    },
    /// A local or coarse factorization hit a (numerically) zero pivot.
    #[error("singular {what} on rank {rank} (zero pivot at step {pivot})")]
    SingularFactor {
        rank: usize,
        what: &'static str,
        pivot: usize,
    },
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
    #[error("unsupported configuration: {0}")]
    Unsupported(&'static str),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("communication error: {0}")]
    Comm(String),
    #[error("consistency check failed: {0}")]
    Check(String),
    #[error("indefinite matrix detected (p^T A p <= 0)")]
    IndefiniteMatrix,
    #[error("indefinite preconditioner detected (beta < 0)")]
    IndefinitePreconditioner,
}

impl BddcError {
    /// Attach rank and factor name to a bare zero-pivot error.
    pub(crate) fn singular(self, rank: usize, what: &'static str) -> Self {
        match self {
            BddcError::ZeroPivot(pivot) => BddcError::SingularFactor { rank, what, pivot },
            other => other,
        }
    }
}
