//! solverbridge: execution-context aware bridge to Krylov and multigrid solver backends
//!
//! This crate lets an application-assembled sparse system (or a matrix-free operator) be solved
//! by iterative methods running on a selectable backend: serial host, parallel host, or an
//! accelerator. Caller matrices and vectors are adapted without copies where the layout allows,
//! solvers and preconditioners are composed from factories and bound to exactly one operator,
//! and every solve returns a [`ConvergenceReport`].

pub mod parallel;

pub mod adapter;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod executor;
pub mod matrix;
pub mod preconditioner;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use adapter::{AdaptationKind, LinearOperatorHandle, VectorAdapter, VectorView, adapt};
pub use config::{BackendChoice, PcKind, SolverConfig, SolverKind};
pub use context::{IterativeSolver, Preconditioner, PreconditionerSpec, Verbosity};
pub use core::{LinOp, Operator, Scalar};
pub use error::{BridgeError, Result};
pub use executor::{DeviceMask, ExecKind, Executor};
pub use matrix::{Csr, CsrView, Dense, PatternFingerprint};
pub use preconditioner::{
    AmgFactory, GeneratedPreconditioner, JacobiFactory, PreconditionerFactory, SmootherKind,
};
pub use solver::{GeneratedSolver, PreconditionerBinding, SolverFactory, SolverMethod};
pub use utils::{ConvergenceReport, ResidualMode, StoppingCriteria};
