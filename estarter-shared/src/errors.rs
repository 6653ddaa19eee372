//! Error types used across the eStarter runtime.

use thiserror::Error;

/// Result type for eStarter operations.
pub type EstarterResult<T> = Result<T, EstarterError>;

#[derive(Debug, Error)]
pub enum EstarterError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("virtual filesystem error: {0}")]
    Vfs(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("wasm runtime error: {0}")]
    Wasm(String),

    #[error("host error: {0}")]
    Host(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

// Implement From for common error types to enable `?` operator
impl From<std::io::Error> for EstarterError {
    fn from(err: std::io::Error) -> Self {
        EstarterError::Internal(format!("I/O error: {}", err))
    }
}

impl From<serde_json::Error> for EstarterError {
    fn from(err: serde_json::Error) -> Self {
        EstarterError::Internal(format!("JSON error: {}", err))
    }
}

impl From<String> for EstarterError {
    fn from(err: String) -> Self {
        EstarterError::Internal(err)
    }
}

impl From<&str> for EstarterError {
    fn from(err: &str) -> Self {
        EstarterError::Internal(err.to_string())
    }
}
