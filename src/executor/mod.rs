//! Execution contexts.
//!
//! An [`Executor`] identifies one compute backend and owns its allocation, transfer and
//! synchronization primitives. It is created once per backend choice and shared, by reference
//! count, between every adapter, solver and preconditioner built against it. Executors are never
//! mutated after creation; moving work to another backend means creating a new executor and
//! rebuilding everything that depends on it.
//!
//! Two creation paths exist:
//! - [`Executor::create`] builds exactly the requested backend and fails when it is unavailable.
//! - [`Executor::create_best_match`] picks the best backend allowed by a [`DeviceMask`] and falls
//!   back silently to the parallel host and then the serial host backend.

use crate::error::{BridgeError, Result};
use crate::parallel::{Backend, BackendRegistry, MemorySpace};
use bitflags::bitflags;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Backend kinds understood by the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecKind {
    /// Sequential host execution.
    Reference,
    /// Shared-memory parallel host execution.
    Omp,
    /// First accelerator kind.
    Cuda,
    /// Second accelerator kind.
    Hip,
}

impl ExecKind {
    pub fn is_device(self) -> bool {
        matches!(self, ExecKind::Cuda | ExecKind::Hip)
    }

    pub fn name(self) -> &'static str {
        match self {
            ExecKind::Reference => "reference",
            ExecKind::Omp => "omp",
            ExecKind::Cuda => "cuda",
            ExecKind::Hip => "hip",
        }
    }
}

impl fmt::Display for ExecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ExecKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "reference" | "ref" | "serial" | "cpu" => Ok(ExecKind::Reference),
            "omp" | "parallel" => Ok(ExecKind::Omp),
            "cuda" => Ok(ExecKind::Cuda),
            "hip" => Ok(ExecKind::Hip),
            other => Err(BridgeError::config(format!("unknown backend kind '{}'", other))),
        }
    }
}

bitflags! {
    /// Device-availability descriptor consumed by best-match selection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceMask: u32 {
        const CPU = 1 << 0;
        const OMP = 1 << 1;
        const CUDA = 1 << 2;
        const HIP = 1 << 3;
    }
}

/// Shared handle to a compute backend.
#[derive(Clone)]
pub struct Executor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    kind: ExecKind,
    device_id: usize,
    backend: Arc<dyn Backend>,
    /// Host executor for device backends; `None` means this executor is its own master.
    master: Option<Executor>,
}

impl Executor {
    /// Create an executor for `kind` from the process-wide registry.
    pub fn create(kind: ExecKind) -> Result<Self> {
        Self::create_in(BackendRegistry::global(), kind)
    }

    /// Create an executor for `kind` from `registry`.
    ///
    /// A kind missing from the registry is an `UnsupportedOperator` error; a registered device kind
    /// that reports zero devices is a `Configuration` error. No fallback is attempted.
    pub fn create_in(registry: &BackendRegistry, kind: ExecKind) -> Result<Self> {
        let backend = registry.get(kind).ok_or_else(|| {
            BridgeError::UnsupportedOperator(format!(
                "backend '{}' is not available in this build",
                kind
            ))
        })?;
        if kind.is_device() {
            if backend.device_count() == 0 {
                return Err(BridgeError::config(format!(
                    "backend '{}' did not report any valid devices",
                    kind
                )));
            }
            let master = Self::host_master(registry)?;
            log::info!("created {} executor on device 0 (master: {})", kind, master.kind());
            return Ok(Self::from_backend(kind, 0, backend.clone(), Some(master)));
        }
        log::info!("created {} executor", kind);
        Ok(Self::from_backend(kind, 0, backend.clone(), None))
    }

    /// Best-match executor from the process-wide registry.
    pub fn create_best_match(mask: DeviceMask) -> Result<Self> {
        Self::create_best_match_in(BackendRegistry::global(), mask)
    }

    /// Pick the best backend allowed by `mask`.
    ///
    /// Accelerators are tried in the order CUDA, HIP; each is skipped silently when the mask does
    /// not allow it or no device is present. Otherwise the parallel host backend is used when
    /// registered, and the serial host backend as the last resort.
    pub fn create_best_match_in(registry: &BackendRegistry, mask: DeviceMask) -> Result<Self> {
        for (flag, kind) in [(DeviceMask::CUDA, ExecKind::Cuda), (DeviceMask::HIP, ExecKind::Hip)] {
            if !mask.contains(flag) {
                continue;
            }
            if registry.device_count(kind) > 0 {
                return Self::create_in(registry, kind);
            }
            log::debug!("best match: {} allowed but unavailable, falling back", kind);
        }
        if registry.contains(ExecKind::Omp) {
            return Self::create_in(registry, ExecKind::Omp);
        }
        Self::create_in(registry, ExecKind::Reference)
    }

    fn host_master(registry: &BackendRegistry) -> Result<Self> {
        if registry.contains(ExecKind::Omp) {
            Self::create_in(registry, ExecKind::Omp)
        } else {
            Self::create_in(registry, ExecKind::Reference)
        }
    }

    fn from_backend(
        kind: ExecKind,
        device_id: usize,
        backend: Arc<dyn Backend>,
        master: Option<Executor>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                kind,
                device_id,
                backend,
                master,
            }),
        }
    }

    pub fn kind(&self) -> ExecKind {
        self.inner.kind
    }

    pub fn device_id(&self) -> usize {
        self.inner.device_id
    }

    /// The host executor responsible for this executor; a host executor is its own master.
    pub fn master(&self) -> Executor {
        match &self.inner.master {
            Some(m) => m.clone(),
            None => self.clone(),
        }
    }

    /// Identity comparison: two handles to the same executor instance.
    pub fn same(&self, other: &Executor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn memory_space(&self) -> MemorySpace {
        self.inner.backend.memory_space()
    }

    /// True when this executor is not its own master, i.e. it drives a device.
    pub fn is_device(&self) -> bool {
        !self.same(&self.master())
    }

    pub fn is_parallel(&self) -> bool {
        self.inner.backend.is_parallel()
    }

    pub fn synchronize(&self) {
        self.inner.backend.synchronize();
    }

    /// Number of references held on this executor.
    pub fn share_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("kind", &self.inner.kind)
            .field("device_id", &self.inner.device_id)
            .field("backend", &self.inner.backend)
            .finish()
    }
}
