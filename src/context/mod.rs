//! Stateful front ends.
//!
//! Modules:
//! - [`ksp_context`]: [`IterativeSolver`], a solver that is configured once and bound to
//!   successive operators.
//! - [`pc_context`]: [`Preconditioner`] and the [`PreconditionerSpec`] configuration enum.
//!
//! Both follow the same rule: changing the operator or the configuration regenerates the
//! backend objects from the stored description, never patches them in place.

pub mod ksp_context;
pub use ksp_context::{IterativeSolver, Verbosity};
pub mod pc_context;
pub use pc_context::{Preconditioner, PreconditionerSpec};
