//! Error types for Logwarden

use thiserror::Error;

/// Result type alias using Logwarden's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Logwarden operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration source could not be read or deserialized
    #[error("Configuration source error: {0}")]
    ConfigSource(#[from] ::config::ConfigError),

    /// Query request rejected before submission
    #[error("Validation error: {0}")]
    Validation(String),

    /// Submit, poll or stop call against the log backend failed
    #[error("Backend error: {0}")]
    Backend(String),

    /// Query job reached the `Failed` state
    #[error("Query {query_id} failed")]
    QueryFailed { query_id: String },

    /// Query job reached the `Cancelled` state
    #[error("Query {query_id} was cancelled")]
    QueryCancelled { query_id: String },

    /// Backend reported a status outside the known domain
    #[error("Query {query_id} returned unknown status: {status}")]
    UnknownStatus { query_id: String, status: String },

    /// Alert state store error
    #[error("Store error: {0}")]
    Store(String),

    /// Message template could not be rendered
    #[error("Template error: {0}")]
    Template(String),

    /// Notification delivery failed
    #[error("Notification error: {0}")]
    Notify(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a template error
    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    /// Create a notification error
    pub fn notify(msg: impl Into<String>) -> Self {
        Self::Notify(msg.into())
    }

    /// Whether this error ended a query job on the backend side
    pub fn is_terminal_job_state(&self) -> bool {
        matches!(self, Self::QueryFailed { .. } | Self::QueryCancelled { .. })
    }
}
