//! Shared utilities.

pub mod convergence;
