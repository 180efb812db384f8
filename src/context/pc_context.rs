//! Stateful preconditioner front end and the preconditioner configuration enum.
//!
//! [`PreconditionerSpec`] describes a preconditioner with all of its sub-options. It turns
//! into a [`PreconditionerFactory`] with [`PreconditionerSpec::build_factory`].
//!
//! [`Preconditioner`] holds such a factory and, after [`Preconditioner::set_operator`], the
//! instance generated for one compressed-row matrix. It can be applied on its own, or handed to
//! an [`IterativeSolver`](super::IterativeSolver) in one of two ways:
//! - the generated instance, when the solver's operator is known to be the same matrix;
//! - the factory, which the solver generates against its own operator.

use crate::adapter::{AdaptationKind, VectorAdapter};
use crate::core::traits::{LinOp, Operator};
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::preconditioner::{
    AmgFactory, FactorizationKind, GeneratedPreconditioner, IcFactory, IluFactory, JacobiFactory,
    PreconditionerFactory, StorageOptimization, TriangularSolve,
};
use crate::solver::PreconditionerBinding;
use std::fmt;
use std::sync::Arc;

/// Preconditioner kind and its options.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum PreconditionerSpec {
    #[default]
    None,
    /// Block Jacobi; block size 1 is point Jacobi.
    Jacobi {
        max_block_size: usize,
        accuracy: f64,
        storage: StorageOptimization,
    },
    Ilu {
        kind: FactorizationKind,
        sweeps: usize,
        skip_sort: bool,
    },
    Ic {
        kind: FactorizationKind,
        sweeps: usize,
        skip_sort: bool,
    },
    /// ILU with approximate-inverse triangular solves.
    IluIsai {
        kind: FactorizationKind,
        sweeps: usize,
        skip_sort: bool,
        sparsity_power: usize,
    },
    IcIsai {
        kind: FactorizationKind,
        sweeps: usize,
        skip_sort: bool,
        sparsity_power: usize,
    },
    Amg(AmgFactory),
}

impl PreconditionerSpec {
    /// The factory for this spec; `None` for [`PreconditionerSpec::None`].
    pub fn build_factory(&self) -> Option<Arc<dyn PreconditionerFactory>> {
        let factory: Arc<dyn PreconditionerFactory> = match *self {
            PreconditionerSpec::None => return None,
            PreconditionerSpec::Jacobi {
                max_block_size,
                accuracy,
                storage,
            } => Arc::new(JacobiFactory::new(max_block_size, accuracy, storage)),
            PreconditionerSpec::Ilu { kind, sweeps, skip_sort } => Arc::new(IluFactory {
                kind,
                sweeps,
                skip_sort,
                trisolve: TriangularSolve::Exact,
            }),
            PreconditionerSpec::Ic { kind, sweeps, skip_sort } => Arc::new(IcFactory {
                kind,
                sweeps,
                skip_sort,
                trisolve: TriangularSolve::Exact,
            }),
            PreconditionerSpec::IluIsai {
                kind,
                sweeps,
                skip_sort,
                sparsity_power,
            } => Arc::new(IluFactory {
                kind,
                sweeps,
                skip_sort,
                trisolve: TriangularSolve::Isai { sparsity_power },
            }),
            PreconditionerSpec::IcIsai {
                kind,
                sweeps,
                skip_sort,
                sparsity_power,
            } => Arc::new(IcFactory {
                kind,
                sweeps,
                skip_sort,
                trisolve: TriangularSolve::Isai { sparsity_power },
            }),
            PreconditionerSpec::Amg(amg) => Arc::new(amg),
        };
        Some(factory)
    }

    /// Binding that generates this spec against the solver's own operator.
    pub fn binding<'a>(&self) -> PreconditionerBinding<'a> {
        match self.build_factory() {
            Some(factory) => PreconditionerBinding::Factory(factory),
            None => PreconditionerBinding::None,
        }
    }
}

/// A preconditioner that can be bound to successive compressed-row matrices.
pub struct Preconditioner<'a> {
    exec: Executor,
    factory: Arc<dyn PreconditionerFactory>,
    generated: Option<GeneratedPreconditioner<'a>>,
    iterative_mode: bool,
}

impl<'a> Preconditioner<'a> {
    pub fn new(exec: &Executor, spec: &PreconditionerSpec) -> Result<Self> {
        let factory = spec
            .build_factory()
            .ok_or_else(|| BridgeError::config("no preconditioner kind selected"))?;
        Ok(Self::from_factory(exec, factory))
    }

    pub fn from_factory(exec: &Executor, factory: Arc<dyn PreconditionerFactory>) -> Self {
        Self {
            exec: exec.clone(),
            factory,
            generated: None,
            iterative_mode: false,
        }
    }

    pub fn factory(&self) -> &Arc<dyn PreconditionerFactory> {
        &self.factory
    }

    /// Regenerate for `op`, which must expose a compressed-row view. On error the previous
    /// instance is kept.
    pub fn set_operator(&mut self, op: &'a dyn Operator) -> Result<()> {
        let view = op.as_csr().ok_or_else(|| {
            BridgeError::config(format!(
                "{} preconditioner accepts only compressed-row operators",
                self.factory.name()
            ))
        })?;
        if view.nrows() != view.ncols() {
            return Err(BridgeError::config(format!(
                "preconditioner operator is not square ({}x{})",
                view.nrows(),
                view.ncols()
            )));
        }
        let generated = self.factory.generate(&self.exec, view)?;
        log::debug!("generated {} preconditioner for {} rows", generated.name(), view.nrows());
        self.generated = Some(generated);
        Ok(())
    }

    pub fn has_generated_preconditioner(&self) -> bool {
        self.generated.is_some()
    }

    pub fn generated_preconditioner(&self) -> Option<&GeneratedPreconditioner<'a>> {
        self.generated.as_ref()
    }

    /// The generated instance when there is one, the factory otherwise.
    pub fn binding(&self) -> PreconditionerBinding<'a> {
        match &self.generated {
            Some(pc) => PreconditionerBinding::Generated(pc.clone()),
            None => PreconditionerBinding::Factory(Arc::clone(&self.factory)),
        }
    }

    pub fn set_iterative_mode(&mut self, warm_start: bool) {
        self.iterative_mode = warm_start;
    }

    /// x = M⁻¹ b, one fixed application.
    pub fn apply(&self, b: &[f64], x: &mut [f64]) -> Result<()> {
        let pc = self
            .generated
            .as_ref()
            .ok_or_else(|| BridgeError::config("preconditioner applied before an operator was set"))?;
        let n = pc.size();
        if b.len() != n {
            return Err(BridgeError::dim("right-hand side length", n, b.len()));
        }
        if x.len() != n {
            return Err(BridgeError::dim("solution length", n, x.len()));
        }
        if !self.iterative_mode {
            x.iter_mut().for_each(|v| *v = 0.0);
        }
        let kind: AdaptationKind = pc.adaptation();
        let adapter = VectorAdapter::new(&self.exec, kind);
        let b_view = adapter.view(b, kind)?;
        let mut x_view = adapter.view_mut(x, kind)?;
        pc.apply(b_view.as_slice(), x_view.as_mut_slice()?)?;
        x_view.commit();
        Ok(())
    }
}

impl fmt::Debug for Preconditioner<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Preconditioner")
            .field("factory", &self.factory)
            .field("generated", &self.generated)
            .finish()
    }
}
