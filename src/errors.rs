pub mod classifier;
pub mod types;

use thiserror::Error;

pub use classifier::{classify, classify_message, Classify};
pub use types::{ErrorCategory, ErrorInfo};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Tool already registered: {0}")]
    DuplicateName(String),

    #[error("Session already exists: {0}")]
    SessionAlreadyExists(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session closed: {0}")]
    SessionClosed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Driver error: {0}")]
    DriverError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl From<config::ConfigError> for ServerError {
    fn from(err: config::ConfigError) -> Self {
        ServerError::ConfigurationError(err.to_string())
    }
}

impl ServerError {
    /// Category a session or registry failure maps to when it reaches a caller.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ServerError::SessionNotFound(_) | ServerError::SessionClosed(_) => {
                ErrorCategory::NotFound
            }
            ServerError::DuplicateName(_)
            | ServerError::SessionAlreadyExists(_)
            | ServerError::ConfigurationError(_)
            | ServerError::SerializationError(_) => ErrorCategory::InvalidInput,
            ServerError::DriverError(_) | ServerError::IoError(_) => ErrorCategory::Unavailable,
        }
    }
}
