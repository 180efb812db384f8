//! Command-line or API options for solvers and preconditioners.
//!
//! [`SolverConfig`] collects every recognized knob with its default. It is filled either
//! field by field or from `key=value` strings with [`SolverConfig::parse_pairs`], and turned
//! into a ready [`IterativeSolver`] with [`SolverConfig::build`].
//!
//! Recognized keys:
//!
//! | key | values | default |
//! |-----|--------|---------|
//! | `backend` | `reference`, `omp`, `cuda`, `hip`, `best-match` | `reference` |
//! | `solver` | `cg`, `bicgstab`, `cgs`, `fcg`, `gmres`, `cb_gmres`, `ir` | `cg` |
//! | `krylov_dim` | integer, 0 = backend default | 0 |
//! | `storage_precision` | `keep`, `reduce1`, `reduce2` | `keep` |
//! | `relaxation_factor` | IR relaxation ω | 1.0 |
//! | `inner_solver` | method of the IR inner solver | `cg` |
//! | `inner_max_iters` | iteration cap of the inner solver | 10 |
//! | `rel_tol`, `abs_tol` | tolerances | 0, 0 |
//! | `max_iters` | iteration cap | 10 |
//! | `residual_mode` | `explicit`, `implicit`, or unset for the method default | unset |
//! | `pc` | `none`, `jacobi`, `ilu`, `ic`, `ilu_isai`, `ic_isai`, `amg` | `none` |
//! | `block_size`, `accuracy`, `storage_optimization` | Jacobi options | 32, 0.1, `none` |
//! | `factorization`, `sweeps`, `skip_sort`, `sparsity_power` | ILU/IC options | `exact`, 5, false, 1 |
//! | `amg_smoother`, `amg_coarse_solver` | `jacobi`, `block_jacobi`, `ic`, `paric`, `cg` | `jacobi` |
//! | `amg_pre_sweeps`, `amg_coarse_iterations` | sweeps | 1, 4 |
//! | `amg_min_coarse_rows`, `amg_max_levels` | hierarchy limits | 64, 10 |
//! | `amg_relaxation` | smoother damping | 0.9 |
//! | `mixed_precision` | bool | false |
//! | `verbosity` | `silent`, `errors`, `summary`, `trace` | `errors` |
//! | `iterative_mode` | bool (warm start) | false |

use crate::context::{IterativeSolver, PreconditionerSpec, Verbosity};
use crate::error::{BridgeError, Result};
use crate::executor::{DeviceMask, ExecKind, Executor};
use crate::preconditioner::{AmgFactory, FactorizationKind, StorageOptimization};
use crate::solver::{SolverFactory, SolverMethod, StoragePrecision};
use crate::utils::convergence::{ResidualMode, StoppingCriteria};
use std::str::FromStr;

/// Backend request: one explicit kind, or best match over a device mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendChoice {
    Explicit(ExecKind),
    BestMatch(DeviceMask),
}

impl Default for BackendChoice {
    fn default() -> Self {
        BackendChoice::Explicit(ExecKind::Reference)
    }
}

impl FromStr for BackendChoice {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "best-match" | "best_match" | "auto" => Ok(BackendChoice::BestMatch(DeviceMask::all())),
            other => other.parse().map(BackendChoice::Explicit),
        }
    }
}

/// Solver method without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SolverKind {
    #[default]
    Cg,
    Bicgstab,
    Cgs,
    Fcg,
    Gmres,
    CbGmres,
    Ir,
}

impl FromStr for SolverKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cg" => Ok(SolverKind::Cg),
            "bicgstab" => Ok(SolverKind::Bicgstab),
            "cgs" => Ok(SolverKind::Cgs),
            "fcg" => Ok(SolverKind::Fcg),
            "gmres" => Ok(SolverKind::Gmres),
            "cb_gmres" | "cb-gmres" | "cbgmres" => Ok(SolverKind::CbGmres),
            "ir" | "richardson" => Ok(SolverKind::Ir),
            other => Err(BridgeError::config(format!("unknown solver '{}'", other))),
        }
    }
}

/// Preconditioner kind without its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PcKind {
    #[default]
    None,
    Jacobi,
    Ilu,
    Ic,
    IluIsai,
    IcIsai,
    Amg,
}

impl FromStr for PcKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(PcKind::None),
            "jacobi" => Ok(PcKind::Jacobi),
            "ilu" => Ok(PcKind::Ilu),
            "ic" => Ok(PcKind::Ic),
            "ilu_isai" | "ilu-isai" => Ok(PcKind::IluIsai),
            "ic_isai" | "ic-isai" => Ok(PcKind::IcIsai),
            "amg" => Ok(PcKind::Amg),
            other => Err(BridgeError::config(format!("unknown preconditioner '{}'", other))),
        }
    }
}

fn number<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| BridgeError::config(format!("invalid value '{}' for '{}'", value, key)))
}

fn flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(BridgeError::config(format!("invalid value '{}' for '{}'", value, key))),
    }
}

/// Every recognized option.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolverConfig {
    pub backend: BackendChoice,
    pub solver: SolverKind,
    pub krylov_dim: usize,
    pub storage_precision: StoragePrecision,
    pub relaxation_factor: f64,
    pub inner_solver: SolverKind,
    pub inner_max_iters: usize,
    pub rel_tol: f64,
    pub abs_tol: f64,
    pub max_iters: usize,
    /// `None` picks the method's default mode.
    pub residual_mode: Option<ResidualMode>,
    pub pc: PcKind,
    pub block_size: usize,
    pub accuracy: f64,
    pub storage_optimization: StorageOptimization,
    pub factorization: FactorizationKind,
    pub sweeps: usize,
    pub skip_sort: bool,
    pub sparsity_power: usize,
    pub amg: AmgFactory,
    pub verbosity: Verbosity,
    pub iterative_mode: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        let criteria = StoppingCriteria::default();
        Self {
            backend: BackendChoice::default(),
            solver: SolverKind::default(),
            krylov_dim: 0,
            storage_precision: StoragePrecision::default(),
            relaxation_factor: 1.0,
            inner_solver: SolverKind::Cg,
            inner_max_iters: 10,
            rel_tol: criteria.rel_tol,
            abs_tol: criteria.abs_tol,
            max_iters: criteria.max_iters,
            residual_mode: None,
            pc: PcKind::default(),
            block_size: 32,
            accuracy: 0.1,
            storage_optimization: StorageOptimization::default(),
            factorization: FactorizationKind::default(),
            sweeps: 5,
            skip_sort: false,
            sparsity_power: 1,
            amg: AmgFactory::default(),
            verbosity: Verbosity::default(),
            iterative_mode: false,
        }
    }
}

impl SolverConfig {
    /// Defaults overridden by `key=value` pairs.
    pub fn parse_pairs<'s>(pairs: impl IntoIterator<Item = &'s str>) -> Result<Self> {
        let mut config = Self::default();
        for pair in pairs {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| BridgeError::config(format!("expected key=value, got '{}'", pair)))?;
            config.set(key.trim(), value.trim())?;
        }
        Ok(config)
    }

    /// Set one option by name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "backend" | "exec" => self.backend = value.parse()?,
            "solver" | "ksp_type" => self.solver = value.parse()?,
            "krylov_dim" | "restart" => self.krylov_dim = number(key, value)?,
            "storage_precision" => self.storage_precision = value.parse()?,
            "relaxation_factor" => self.relaxation_factor = number(key, value)?,
            "inner_solver" => self.inner_solver = value.parse()?,
            "inner_max_iters" => self.inner_max_iters = number(key, value)?,
            "rel_tol" | "rtol" => self.rel_tol = number(key, value)?,
            "abs_tol" | "atol" => self.abs_tol = number(key, value)?,
            "max_iters" | "max_it" => self.max_iters = number(key, value)?,
            "residual_mode" => self.residual_mode = Some(value.parse()?),
            "pc" | "pc_type" => self.pc = value.parse()?,
            "block_size" => self.block_size = number(key, value)?,
            "accuracy" => self.accuracy = number(key, value)?,
            "storage_optimization" => self.storage_optimization = value.parse()?,
            "factorization" => self.factorization = value.parse()?,
            "sweeps" => self.sweeps = number(key, value)?,
            "skip_sort" => self.skip_sort = flag(key, value)?,
            "sparsity_power" => self.sparsity_power = number(key, value)?,
            "amg_smoother" => self.amg.smoother = value.parse()?,
            "amg_coarse_solver" => self.amg.coarse_solver = value.parse()?,
            "amg_pre_sweeps" => self.amg.pre_sweeps = number(key, value)?,
            "amg_coarse_iterations" => self.amg.coarse_iterations = number(key, value)?,
            "amg_min_coarse_rows" => self.amg.min_coarse_rows = number(key, value)?,
            "amg_max_levels" => self.amg.max_levels = number(key, value)?,
            "amg_relaxation" => self.amg.relaxation = number(key, value)?,
            "mixed_precision" => self.amg.mixed_precision = flag(key, value)?,
            "verbosity" => self.verbosity = value.parse()?,
            "iterative_mode" | "warm_start" => self.iterative_mode = flag(key, value)?,
            other => return Err(BridgeError::config(format!("unknown option '{}'", other))),
        }
        Ok(())
    }

    /// The configured backend.
    pub fn executor(&self) -> Result<Executor> {
        match self.backend {
            BackendChoice::Explicit(kind) => Executor::create(kind),
            BackendChoice::BestMatch(mask) => Executor::create_best_match(mask),
        }
    }

    fn method_of(&self, kind: SolverKind) -> SolverMethod {
        match kind {
            SolverKind::Cg => SolverMethod::Cg,
            SolverKind::Bicgstab => SolverMethod::Bicgstab,
            SolverKind::Cgs => SolverMethod::Cgs,
            SolverKind::Fcg => SolverMethod::Fcg,
            SolverKind::Gmres => SolverMethod::Gmres {
                krylov_dim: self.krylov_dim,
            },
            SolverKind::CbGmres => SolverMethod::CbGmres {
                krylov_dim: self.krylov_dim,
                storage: self.storage_precision,
            },
            SolverKind::Ir => SolverMethod::Ir {
                relaxation_factor: self.relaxation_factor,
            },
        }
    }

    pub fn method(&self) -> SolverMethod {
        self.method_of(self.solver)
    }

    pub fn criteria(&self) -> StoppingCriteria {
        let mode = self.residual_mode.unwrap_or_else(|| self.method().default_mode());
        StoppingCriteria::new(self.rel_tol, self.abs_tol, self.max_iters, mode)
    }

    pub fn preconditioner_spec(&self) -> PreconditionerSpec {
        let (kind, sweeps, skip_sort, sparsity_power) =
            (self.factorization, self.sweeps, self.skip_sort, self.sparsity_power);
        match self.pc {
            PcKind::None => PreconditionerSpec::None,
            PcKind::Jacobi => PreconditionerSpec::Jacobi {
                max_block_size: self.block_size,
                accuracy: self.accuracy,
                storage: self.storage_optimization,
            },
            PcKind::Ilu => PreconditionerSpec::Ilu { kind, sweeps, skip_sort },
            PcKind::Ic => PreconditionerSpec::Ic { kind, sweeps, skip_sort },
            PcKind::IluIsai => PreconditionerSpec::IluIsai {
                kind,
                sweeps,
                skip_sort,
                sparsity_power,
            },
            PcKind::IcIsai => PreconditionerSpec::IcIsai {
                kind,
                sweeps,
                skip_sort,
                sparsity_power,
            },
            PcKind::Amg => PreconditionerSpec::Amg(AmgFactory {
                skip_sort,
                ..self.amg
            }),
        }
    }

    /// An unbound solver on `exec`. For IR the preconditioner is attached to the inner solver.
    pub fn build<'a>(&self, exec: &Executor) -> Result<IterativeSolver<'a>> {
        if self.rel_tol < 0.0 || self.abs_tol < 0.0 {
            return Err(BridgeError::config("tolerances must be non-negative"));
        }
        let binding = self.preconditioner_spec().binding();
        let mut factory = SolverFactory::new(exec, self.method()).with_criteria(self.criteria());
        if self.solver == SolverKind::Ir {
            if self.inner_solver == SolverKind::Ir {
                return Err(BridgeError::config("the inner solver of IR cannot be IR"));
            }
            let inner_method = self.method_of(self.inner_solver);
            let inner = SolverFactory::new(exec, inner_method)
                .with_criteria(
                    StoppingCriteria::default()
                        .with_max_iters(self.inner_max_iters)
                        .with_mode(inner_method.default_mode()),
                )
                .with_preconditioner(binding);
            factory = factory.with_inner_solver(inner);
        } else {
            factory = factory.with_preconditioner(binding);
        }
        let mut solver = IterativeSolver::from_factory(factory);
        solver.set_verbosity(self.verbosity);
        solver.set_iterative_mode(self.iterative_mode);
        Ok(solver)
    }
}
