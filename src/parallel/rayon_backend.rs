// rayon-based shared-memory backend

use super::{Backend, MemorySpace};
use crate::executor::ExecKind;

#[derive(Debug, Clone, Copy)]
pub struct RayonBackend {
    threads: usize,
}

impl RayonBackend {
    pub fn new() -> Self {
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_cpus::get())
            .build_global()
            .ok();
        RayonBackend {
            threads: rayon::current_num_threads(),
        }
    }

    /// Worker threads in the global pool.
    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl Default for RayonBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for RayonBackend {
    fn kind(&self) -> ExecKind {
        ExecKind::Omp
    }
    fn device_count(&self) -> usize {
        1
    }
    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Host
    }
    fn is_parallel(&self) -> bool {
        true
    }
    fn synchronize(&self) {
        rayon::scope(|_| {});
    }
}
