//! Configuration: string-parsable option enums and the [`SolverConfig`] builder.

pub mod options;
pub use options::{BackendChoice, PcKind, SolverConfig, SolverKind};
