//! Direct and Krylov solvers.
//!
//! `LuSolver` factors the small dense systems of the preconditioner (local saddle-point
//! systems, the coarse problem); `PcgSolver` is the distributed outer iteration used to drive
//! BDDC or the FETI-DP dual system.

pub mod direct_lu;
pub use direct_lu::LuSolver;

pub mod pcg;
pub use pcg::{CgNormType, PcgSolver};
