use thiserror::Error;

// Unified error type for solverbridge

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Invalid request: unavailable backend, non-square operator, generic operator where a
    /// native matrix is required, solver used before an operator was bound.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("dimension mismatch for {what}: expected {expected}, found {found}")]
    Dimension {
        what: &'static str,
        expected: String,
        found: String,
    },
    #[error("unsupported operator: {0}")]
    UnsupportedOperator(String),
    #[error("factorization error: {0}")]
    Factorization(String),
    #[error("zero pivot at row {0}")]
    ZeroPivot(usize),
}

impl BridgeError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        BridgeError::Configuration(msg.into())
    }

    pub(crate) fn dim(what: &'static str, expected: impl ToString, found: impl ToString) -> Self {
        BridgeError::Dimension {
            what,
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
