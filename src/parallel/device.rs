//! Emulated accelerator backend.
//!
//! Arrays allocated on an `EmulatedDevice` executor live in a device memory space: they can only
//! be read on the host after an explicit copy to the master executor. Kernels run on the host
//! thread, which keeps results bit-identical to the reference backend while still exercising the
//! transfer and synchronization boundary of a real accelerator.

use super::{Backend, MemorySpace};
use crate::executor::ExecKind;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
pub struct EmulatedDevice {
    kind: ExecKind,
    devices: usize,
    syncs: AtomicUsize,
}

impl EmulatedDevice {
    /// Emulate `devices` accelerators of kind `kind` (`Cuda` or `Hip`).
    pub fn new(kind: ExecKind, devices: usize) -> Self {
        Self {
            kind,
            devices,
            syncs: AtomicUsize::new(0),
        }
    }

    /// Number of synchronization points reached so far.
    pub fn sync_count(&self) -> usize {
        self.syncs.load(Ordering::Relaxed)
    }
}

impl Backend for EmulatedDevice {
    fn kind(&self) -> ExecKind {
        self.kind
    }
    fn device_count(&self) -> usize {
        self.devices
    }
    fn memory_space(&self) -> MemorySpace {
        MemorySpace::Device
    }
    fn synchronize(&self) {
        self.syncs.fetch_add(1, Ordering::Relaxed);
    }
}
