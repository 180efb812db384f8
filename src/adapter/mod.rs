//! Caller-to-backend adaptation of operators and vectors.

pub mod operator;
pub use operator::{AdaptationKind, CsrOperator, LinearOperatorHandle, OperatorWrapper, adapt};
pub mod vector;
pub use vector::{VectorAdapter, VectorView};
