//! Engine error types

use thiserror::Error;

/// Errors surfaced across the embedding boundary
#[derive(Debug, Error)]
pub enum EngineError {
    /// Type error (e.g., wrong value shape where coercion is not allowed)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Range error (e.g., invalid buffer bounds)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// The engine could not materialize a value (allocation/cell-creation failure)
    #[error("OutOfMemory")]
    OutOfMemory,

    /// A call argument did not match the declared parameter shape
    #[error("invalid argument {index}: expected {expected}")]
    InvalidArgument {
        /// Human-readable description of the expected parameter shape
        expected: String,
        /// Zero-based position of the offending parameter
        index: usize,
    },

    /// I/O failure while importing a descriptor-backed buffer
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("InternalError: {0}")]
    Internal(String),
}

impl EngineError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create an invalid-argument error for parameter `index`
    pub fn invalid_argument(expected: impl Into<String>, index: usize) -> Self {
        Self::InvalidArgument {
            expected: expected.into(),
            index,
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;
