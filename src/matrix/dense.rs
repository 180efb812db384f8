//! Executor-tagged storage.
//!
//! [`Array`] is a buffer owned by one executor. On a device executor its contents are not
//! host-readable: the only way to look at them is [`Array::copy_to`] the master executor, which
//! synchronizes the source first. [`Dense`] is a small column-major matrix on top of an array,
//! used for 1×1 scaling scalars and for logger results.

use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::parallel::MemorySpace;

#[derive(Debug, Clone)]
pub struct Array<T> {
    exec: Executor,
    data: Vec<T>,
}

impl<T: Copy + Default> Array<T> {
    /// Allocate on `exec` and fill from host memory (a host→device copy on device executors).
    pub fn from_host(exec: &Executor, data: &[T]) -> Self {
        Self {
            exec: exec.clone(),
            data: data.to_vec(),
        }
    }

    pub fn zeros(exec: &Executor, len: usize) -> Self {
        Self {
            exec: exec.clone(),
            data: vec![T::default(); len],
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    /// Host access; fails for device-resident arrays.
    pub fn host_view(&self) -> Result<&[T]> {
        match self.exec.memory_space() {
            MemorySpace::Host => Ok(&self.data),
            MemorySpace::Device => Err(BridgeError::config(format!(
                "array lives on {} device memory; copy it to the master executor first",
                self.exec.kind()
            ))),
        }
    }

    /// Copy to `target`, waiting for pending work on the source executor.
    pub fn copy_to(&self, target: &Executor) -> Array<T> {
        self.exec.synchronize();
        Self {
            exec: target.clone(),
            data: self.data.clone(),
        }
    }

    /// Overwrite `host` with the array contents via the master executor.
    pub fn copy_to_host(&self, host: &mut [T]) {
        self.exec.synchronize();
        host.copy_from_slice(&self.data);
    }

    /// Kernel-side buffer, valid in the executor's own memory space.
    pub(crate) fn raw(&self) -> &[T] {
        &self.data
    }

    pub(crate) fn raw_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// Small dense matrix stored column-major on an executor.
#[derive(Debug, Clone)]
pub struct Dense {
    size: (usize, usize),
    values: Array<f64>,
}

impl Dense {
    pub fn new(exec: &Executor, rows: usize, cols: usize, column_major: &[f64]) -> Result<Self> {
        if column_major.len() != rows * cols {
            return Err(BridgeError::dim("dense values", rows * cols, column_major.len()));
        }
        Ok(Self {
            size: (rows, cols),
            values: Array::from_host(exec, column_major),
        })
    }

    /// 1×1 matrix holding `value`.
    pub fn scalar(exec: &Executor, value: f64) -> Self {
        Self {
            size: (1, 1),
            values: Array::from_host(exec, &[value]),
        }
    }

    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    pub fn executor(&self) -> &Executor {
        self.values.executor()
    }

    /// Host read of entry (i, j); device-resident matrices must be copied first.
    pub fn at(&self, i: usize, j: usize) -> Result<f64> {
        let host = self.values.host_view()?;
        Ok(host[j * self.size.0 + i])
    }

    pub fn copy_to(&self, exec: &Executor) -> Dense {
        Self {
            size: self.size,
            values: self.values.copy_to(exec),
        }
    }

    pub(crate) fn set_raw(&mut self, idx: usize, v: f64) {
        self.values.raw_mut()[idx] = v;
    }
}
