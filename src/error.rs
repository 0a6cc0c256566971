//! Error types for SpatialMind
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.
//!
//! Execution failures and per-row geometry decode failures have no variant
//! here: the former are reported through a failed `QueryResult`, the latter
//! through the classifier's skip count.

use thiserror::Error;

/// Main error type for SpatialMind operations
#[derive(Error, Debug)]
pub enum SpatialMindError {
    /// Configuration errors (unknown backend tag, malformed values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database unreachable or connection setup failed
    #[error("Connection error: {0}")]
    Connection(String),

    /// Model-stage failure (request failed, malformed response)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Model or database call exceeded its configured timeout
    #[error("Timed out after {seconds}s: {operation}")]
    Timeout {
        /// Operation that timed out
        operation: String,
        /// Configured limit in seconds
        seconds: u64,
    },

    /// Schema introspection failed
    #[error("Database error: {0}")]
    Database(String),

    /// Initialize was called for an identifier that is already live
    #[error("Session already exists: {0}")]
    SessionExists(String),

    /// No live session with the given identifier
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Request was well-formed but not acceptable for the session
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Image could not be read or decoded
    #[error("Image error: {0}")]
    Image(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for SpatialMind operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type.
/// Callers that need to branch on the failure kind downcast to
/// [`SpatialMindError`].
pub type Result<T> = anyhow::Result<T>;

/// Finds the first [`SpatialMindError`] in an error chain
pub fn classify(err: &anyhow::Error) -> Option<&SpatialMindError> {
    err.chain().find_map(|e| e.downcast_ref::<SpatialMindError>())
}
