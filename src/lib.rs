//! bddc: BDDC and FETI-DP domain-decomposition preconditioners over Faer
//!
//! Every rank owns one subdomain, given as an unassembled local (Neumann) matrix and a
//! local-to-global numbering. The crate analyses the subdomain interface, selects primal
//! constraints, builds local Schur complements and the coarse problem, and applies the
//! two-level BDDC preconditioner or the FETI-DP dual operator. Ranks talk through the
//! [`parallel::Comm`] trait: threads of one process ([`parallel::LocalComm`]) or MPI
//! processes (feature `mpi`).

pub mod parallel;

pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use config::*;
pub use context::*;
pub use crate::core::*;
pub use error::*;
pub use matrix::*;
pub use parallel::{Comm, LocalComm, LocalToGlobalMapping, SharingInfo};
pub use preconditioner::*;
pub use solver::*;

// Re-export SolveStats at the crate root for convenience
pub use utils::convergence::SolveStats;
