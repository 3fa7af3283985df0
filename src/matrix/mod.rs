//! Matrix module: the local sparse container, index sets, dense helpers and the unassembled
//! subdomain operator.

pub mod dense;
pub mod index_set;
pub mod sparse;
pub mod subdomain;

pub use index_set::IndexSet;
pub use sparse::{CsrMatrix, SparseMatrix};
pub use subdomain::SubdomainMatrix;
