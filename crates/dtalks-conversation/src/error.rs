use thiserror::Error;

/// Conversation-specific error types
#[derive(Error, Debug)]
pub enum ConversationError {
    #[error("Guardrail error: {0}")]
    Guardrail(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error(transparent)]
    App(#[from] dtalks_core::AppError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ConversationError {
    pub fn guardrail(msg: impl Into<String>) -> Self {
        Self::Guardrail(msg.into())
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        Self::Delivery(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, ConversationError>;

impl From<ConversationError> for dtalks_core::AppError {
    fn from(err: ConversationError) -> Self {
        match err {
            ConversationError::Guardrail(msg) => dtalks_core::AppError::internal(msg),
            ConversationError::Pipeline(msg) => dtalks_core::AppError::internal(msg),
            ConversationError::Delivery(msg) => dtalks_core::AppError::external("chat", msg),
            ConversationError::App(e) => e,
            ConversationError::Io(e) => dtalks_core::AppError::Io(e),
            ConversationError::Serialization(e) => dtalks_core::AppError::Serialization(e),
        }
    }
}
