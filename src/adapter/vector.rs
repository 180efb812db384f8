//! Vector adaptation.
//!
//! A [`VectorView`] presents a caller buffer to the backend for the duration of one call. On a
//! host executor a zero-copy view is the caller slice itself. On a device executor the buffer is
//! staged into device memory, and mutable views must be [`VectorView::commit`]ted to write the
//! result back. Wrapped views always reference the caller buffer and leave residence to the
//! caller's operator.

use super::operator::AdaptationKind;
use crate::error::{BridgeError, Result};
use crate::executor::Executor;
use crate::matrix::Array;

enum Storage<'v> {
    Read(&'v [f64]),
    Write(&'v mut [f64]),
    Staged {
        device: Array<f64>,
        write_back: Option<&'v mut [f64]>,
    },
}

pub struct VectorView<'v> {
    exec: Executor,
    kind: AdaptationKind,
    storage: Storage<'v>,
}

impl<'v> VectorView<'v> {
    pub fn kind(&self) -> AdaptationKind {
        self.kind
    }

    pub fn executor(&self) -> &Executor {
        &self.exec
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Kernel-side buffer.
    pub(crate) fn as_slice(&self) -> &[f64] {
        match &self.storage {
            Storage::Read(s) => s,
            Storage::Write(s) => s,
            Storage::Staged { device, .. } => device.raw(),
        }
    }

    pub(crate) fn as_mut_slice(&mut self) -> Result<&mut [f64]> {
        match &mut self.storage {
            Storage::Read(_) => Err(BridgeError::config("vector view is read-only")),
            Storage::Write(s) => Ok(s),
            Storage::Staged { device, write_back } => {
                if write_back.is_none() {
                    return Err(BridgeError::config("vector view is read-only"));
                }
                Ok(device.raw_mut())
            }
        }
    }

    /// Finish the call: staged device contents are copied back into the caller buffer.
    pub fn commit(self) {
        if let Storage::Staged {
            device,
            write_back: Some(host),
        } = self.storage
        {
            device.copy_to_host(host);
        }
    }
}

impl std::fmt::Debug for VectorView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorView")
            .field("exec", &self.exec.kind())
            .field("kind", &self.kind)
            .field("len", &self.len())
            .finish()
    }
}

/// Builds vector views consistent with one operator binding.
#[derive(Debug, Clone)]
pub struct VectorAdapter {
    exec: Executor,
    required: AdaptationKind,
}

impl VectorAdapter {
    /// `required` is the combined adaptation kind of the operator chain the views will feed.
    pub fn new(exec: &Executor, required: AdaptationKind) -> Self {
        Self {
            exec: exec.clone(),
            required,
        }
    }

    pub fn required(&self) -> AdaptationKind {
        self.required
    }

    fn check(&self, requested: AdaptationKind) -> Result<()> {
        if requested != self.required {
            return Err(BridgeError::config(format!(
                "requested {:?} vectors for an operator chain that requires {:?}",
                requested, self.required
            )));
        }
        Ok(())
    }

    pub fn view<'v>(&self, v: &'v [f64], requested: AdaptationKind) -> Result<VectorView<'v>> {
        self.check(requested)?;
        let storage = if requested == AdaptationKind::ZeroCopy && self.exec.is_device() {
            Storage::Staged {
                device: Array::from_host(&self.exec, v),
                write_back: None,
            }
        } else {
            Storage::Read(v)
        };
        Ok(VectorView {
            exec: self.exec.clone(),
            kind: requested,
            storage,
        })
    }

    pub fn view_mut<'v>(&self, v: &'v mut [f64], requested: AdaptationKind) -> Result<VectorView<'v>> {
        self.check(requested)?;
        let storage = if requested == AdaptationKind::ZeroCopy && self.exec.is_device() {
            Storage::Staged {
                device: Array::from_host(&self.exec, v),
                write_back: Some(v),
            }
        } else {
            Storage::Write(v)
        };
        Ok(VectorView {
            exec: self.exec.clone(),
            kind: requested,
            storage,
        })
    }
}
