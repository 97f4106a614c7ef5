//! Application-wide error type

use thiserror::Error;

/// Errors shared across the workspace crates
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("External service error ({service}): {message}")]
    External { service: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn external(service: impl Into<String>, message: impl ToString) -> Self {
        Self::External {
            service: service.into(),
            message: message.to_string(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// True for failures of a remote collaborator, which callers degrade
    /// around instead of surfacing.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::External { .. })
    }
}

/// Result type using [`AppError`]
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_error_display() {
        let err = AppError::external("translation", "timeout");
        assert_eq!(err.to_string(), "External service error (translation): timeout");
        assert!(err.is_external());
        assert!(!AppError::validation("x").is_external());
    }

    #[test]
    fn test_from_serde_error() {
        let err: AppError = serde_json::from_str::<Vec<u8>>("not json").unwrap_err().into();
        assert!(matches!(err, AppError::Serialization(_)));
    }
}
