//! Context objects threaded through the setup of the preconditioner.

pub mod session;
pub use session::SetupSession;
