//! Matrix module: compressed-row views and executor-tagged dense storage.

pub mod dense;
pub use dense::{Array, Dense};
pub mod sparse;
pub use sparse::{Csr, CsrView, PatternFingerprint};
