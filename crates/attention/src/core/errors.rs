//! Error types emitted by attention implementations.

use candle_core::DType;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AttentionError>;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// A construction-time invariant (dimensions, heads, dropout) is violated.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// The supplied tensor shapes do not align with the documented contract.
    #[error("shape mismatch for {tensor}: expected {expected}, got {actual:?}")]
    ShapeMismatch {
        tensor: &'static str,
        expected: String,
        actual: Vec<usize>,
    },

    /// The tensor dtype is not supported for this argument.
    #[error("unsupported dtype {dtype:?} for {tensor}")]
    UnsupportedDType { tensor: &'static str, dtype: DType },

    /// A backend failure propagated from Candle.
    #[error("backend error: {0}")]
    Backend(#[from] candle_core::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A configuration file could not be parsed.
    #[error("config format error: {0}")]
    ConfigFormat(String),

    /// A checkpoint does not match the module it is loaded into.
    #[error("checkpoint error: {0}")]
    Checkpoint(String),
}

impl AttentionError {
    pub(crate) fn config<S: Into<String>>(msg: S) -> Self {
        AttentionError::Configuration(msg.into())
    }

    pub(crate) fn shape<S: Into<String>>(tensor: &'static str, expected: S, actual: &[usize]) -> Self {
        AttentionError::ShapeMismatch {
            tensor,
            expected: expected.into(),
            actual: actual.to_vec(),
        }
    }
}
