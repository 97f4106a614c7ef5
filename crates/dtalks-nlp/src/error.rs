//! NLP-specific error types

use thiserror::Error;

/// NLP-specific error types
#[derive(Error, Debug)]
pub enum NlpError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Model error: {0}")]
    Model(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Centroid store error: {0}")]
    Centroid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl NlpError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn centroid(msg: impl Into<String>) -> Self {
        Self::Centroid(msg.into())
    }
}

/// Result type for NLP operations
pub type Result<T> = std::result::Result<T, NlpError>;

// Convert to dtalks_core AppError
impl From<NlpError> for dtalks_core::AppError {
    fn from(err: NlpError) -> Self {
        match err {
            NlpError::Validation(msg) => dtalks_core::AppError::validation(msg),
            NlpError::Model(msg) => dtalks_core::AppError::internal(msg),
            NlpError::Training(msg) => dtalks_core::AppError::internal(msg),
            NlpError::Centroid(msg) => dtalks_core::AppError::internal(msg),
            NlpError::Io(e) => dtalks_core::AppError::Io(e),
            NlpError::Serialization(e) => dtalks_core::AppError::Serialization(e),
        }
    }
}
