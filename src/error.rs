//! Error types for the generate/execute/verify loop.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sandbox, configuration and audit operations.
///
/// Provider failures have their own type, [`crate::provider::ProviderError`],
/// because they are captured per candidate inside the provider chain.
#[derive(Error, Debug)]
pub enum Error {
    /// The container runtime was unreachable or the base image could not be obtained.
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// Transferring or executing code inside a running session failed.
    #[error("sandbox execution failed: {0}")]
    SandboxExecution(String),

    /// Failed to tear down a sandbox session.
    #[error("failed to tear down sandbox session {id}: {reason}")]
    SandboxTeardown { id: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A task request failed validation.
    #[error("invalid task: {0}")]
    InvalidTask(String),

    /// An attachment could not be read or classified.
    #[error("failed to read attachment {path}: {reason}")]
    Attachment { path: PathBuf, reason: String },

    /// Serialization of a record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Persisting an audit record failed.
    #[error("audit persistence failed: {0}")]
    Audit(String),
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, Error>;
