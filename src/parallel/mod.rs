//! Runtime backend registry.
//!
//! Every compute backend (serial host, rayon host, accelerator kinds) is one implementation of
//! [`Backend`], registered at runtime in a [`BackendRegistry`]. [`crate::executor::Executor`]
//! resolves a requested [`ExecKind`] against a registry when it is created, so call sites never
//! carry backend-specific conditional code.
//!
//! Modules:
//! - [`rayon_backend`]: shared-memory parallel host backend (feature `rayon`).
//! - [`device`]: emulated accelerator backend with a separate device memory space.

use crate::executor::ExecKind;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Where memory owned by an executor lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemorySpace {
    Host,
    Device,
}

/// One compute backend.
pub trait Backend: Send + Sync + fmt::Debug {
    /// The executor kind this backend serves.
    fn kind(&self) -> ExecKind;
    /// Number of devices the backend reports; host backends report 1.
    fn device_count(&self) -> usize;
    /// Memory space of arrays allocated on this backend.
    fn memory_space(&self) -> MemorySpace;
    /// Whether vector and sparse kernels fan out over worker threads.
    fn is_parallel(&self) -> bool {
        false
    }
    /// Block until all queued work on the backend has completed.
    fn synchronize(&self) {}
}

/// Sequential host backend; always available.
#[derive(Debug, Default, Clone, Copy)]
pub struct ReferenceBackend;

impl Backend for ReferenceBackend {
    fn kind(&self) -> ExecKind {
        ExecKind::Reference
    }
    fn device_count(&self) -> usize {
        1
    }
    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Host
    }
}

#[cfg(feature = "rayon")]
pub mod rayon_backend;
#[cfg(feature = "rayon")]
pub use rayon_backend::RayonBackend;

pub mod device;
pub use device::EmulatedDevice;

/// Set of available backends, at most one per [`ExecKind`].
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self { backends: Vec::new() }
    }

    /// Registry holding every backend compiled into this build.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(Arc::new(ReferenceBackend));
        #[cfg(feature = "rayon")]
        reg.register(Arc::new(RayonBackend::new()));
        reg
    }

    /// Process-wide registry used by [`crate::executor::Executor::create`].
    pub fn global() -> &'static BackendRegistry {
        static GLOBAL: OnceLock<BackendRegistry> = OnceLock::new();
        GLOBAL.get_or_init(BackendRegistry::with_defaults)
    }

    /// Register a backend, replacing any previous backend of the same kind.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> &mut Self {
        let kind = backend.kind();
        self.backends.retain(|b| b.kind() != kind);
        self.backends.push(backend);
        self
    }

    /// Builder form of [`BackendRegistry::register`].
    pub fn with(mut self, backend: Arc<dyn Backend>) -> Self {
        self.register(backend);
        self
    }

    pub fn get(&self, kind: ExecKind) -> Option<&Arc<dyn Backend>> {
        self.backends.iter().find(|b| b.kind() == kind)
    }

    pub fn contains(&self, kind: ExecKind) -> bool {
        self.get(kind).is_some()
    }

    /// Device count for `kind`, zero when the kind is not registered.
    pub fn device_count(&self, kind: ExecKind) -> usize {
        self.get(kind).map_or(0, |b| b.device_count())
    }
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.kind()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_contain_reference() {
        let reg = BackendRegistry::with_defaults();
        assert!(reg.contains(ExecKind::Reference));
        assert!(!reg.contains(ExecKind::Cuda));
        assert_eq!(reg.device_count(ExecKind::Hip), 0);
    }

    #[test]
    fn register_replaces_same_kind() {
        let reg = BackendRegistry::new()
            .with(Arc::new(EmulatedDevice::new(ExecKind::Cuda, 1)))
            .with(Arc::new(EmulatedDevice::new(ExecKind::Cuda, 3)));
        assert_eq!(reg.device_count(ExecKind::Cuda), 3);
        assert_eq!(format!("{:?}", reg), "[Cuda]");
    }
}
