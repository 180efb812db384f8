//! Core traits and kernels.

pub mod traits;
pub use traits::{LinOp, Operator, Scalar};
pub mod wrappers;
