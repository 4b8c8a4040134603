//! Error types for beacon-core

use thiserror::Error;

/// Main error type for the beacon-core library
///
/// Delivery-path variants carry an HTTP-style status code (see [`Error::status`])
/// so diagnostics can be reported uniformly. None of them ever reach the caller
/// of [`crate::Beacon::ingest`]; they are reported through [`crate::diagnostics`].
#[derive(Error, Debug)]
pub enum Error {
    /// Required installation-time configuration (API key, project) is absent
    #[error("configuration missing: {0}")]
    ConfigurationMissing(String),

    /// Caller metadata does not have an object shape
    #[error("metadata schema error: {0}")]
    Schema(String),

    /// Event could not be encoded to JSON
    #[error("encoding error: {0}")]
    Encoding(#[source] serde_json::Error),

    /// Per-minute quota exhausted
    #[error("requests throttled ({used}/{limit})")]
    Throttled { used: u32, limit: u32 },

    /// Server rejected the API key
    #[error("authorization error: API key is invalid")]
    Authorization,

    /// Server does not know the configured project
    #[error("project '{project}' does not exist")]
    NotFound { project: String },

    /// Any other non-success response
    #[error("ingest error: {message}")]
    Server { status: u16, message: String },

    /// Request never produced a response (timeout, connection failure)
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration file error
    #[error("configuration error: {0}")]
    Config(String),

    /// Durable store error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Background runtime could not be created
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl Error {
    /// Status code used when reporting this error as a diagnostic.
    pub fn status(&self) -> u16 {
        match self {
            Error::ConfigurationMissing(_) => 422,
            Error::Schema(_) => 400,
            Error::Throttled { .. } => 429,
            Error::Authorization => 401,
            Error::NotFound { .. } => 404,
            Error::Server { status, .. } => *status,
            _ => 500,
        }
    }
}

/// Result type alias for beacon-core
pub type Result<T> = std::result::Result<T, Error>;
