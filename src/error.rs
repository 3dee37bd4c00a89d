//! Error types for a3s-link

use thiserror::Error;

/// Errors that can occur while managing messaging sessions
#[derive(Debug, Error)]
pub enum LinkError {
    /// The external client could not be constructed or authenticated
    #[error("Failed to initialize session '{session_id}': {reason}")]
    InitializationFailure { session_id: String, reason: String },

    /// No session registered under the given id
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// A session with the given id is already registered
    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    /// No credential snapshot can be read for the session yet
    #[error("Credentials unavailable for session '{session_id}': {reason}")]
    CredentialsUnavailable { session_id: String, reason: String },

    /// The external client rejected (or timed out on) an outbound message
    #[error("Failed to send message to '{target}': {reason}")]
    SendFailed { target: String, reason: String },

    /// Malformed caller input
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Bounded wait elapsed
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Provider transport or protocol error
    #[error("Provider error: {0}")]
    Provider(String),

    /// Credential store failure
    #[error("Store error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LinkError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::InitializationFailure { .. } => "INITIALIZATION_FAILURE",
            LinkError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            LinkError::AlreadyExists(_) => "ALREADY_EXISTS",
            LinkError::CredentialsUnavailable { .. } => "CREDENTIALS_UNAVAILABLE",
            LinkError::SendFailed { .. } => "SEND_FAILED",
            LinkError::InvalidRequest(_) => "INVALID_REQUEST",
            LinkError::Timeout(_) => "TIMEOUT",
            LinkError::Provider(_) => "PROVIDER_ERROR",
            LinkError::Store(_) => "STORE_ERROR",
            LinkError::Config(_) => "CONFIG_ERROR",
            LinkError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;
