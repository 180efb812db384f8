//! Convergence criteria, loggers and reports.

pub mod convergence;
pub use convergence::{
    CombinedCriterion, ConvergenceLogger, ConvergenceReport, IterationStatus, ResidualLogger, ResidualMode,
    StopCheck, StoppingCriteria,
};
