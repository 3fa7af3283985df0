//! Preconditioner configuration.

pub mod options;
pub use options::{BddcOptions, CoarseKind, ScalingKind};
