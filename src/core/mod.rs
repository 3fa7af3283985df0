//! Core traits and the distributed inner product.

pub mod traits;
pub mod wrappers;

pub use traits::{InnerProduct, LinearOperator, RowPattern};
pub use wrappers::DistributedInnerProduct;
