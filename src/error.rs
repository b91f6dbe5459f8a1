//! Error types for the retrieval evaluator.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our custom error.
pub type Result<T> = std::result::Result<T, EvalError>;

/// Errors that can occur while indexing or evaluating.
#[derive(Error, Debug)]
pub enum EvalError {
    /// A required input file does not exist.
    #[error("File not found at '{0}'")]
    MissingFile(PathBuf),

    /// A fixture file exists but does not have the expected shape.
    #[error("Malformed fixture '{path}': {reason}")]
    MalformedFixture { path: PathBuf, reason: String },

    /// Error reading or writing files.
    #[error("I/O error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error during serialization/deserialization.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The vector-search service rejected a request or answered unexpectedly.
    #[error("Remote service error{}: {message}", .status.map(|s| format!(" ({s})")).unwrap_or_default())]
    RemoteService { status: Option<u16>, message: String },

    /// HTTP request error.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Rasterizing a PDF into page images failed.
    #[error("Render error for '{path}': {reason}")]
    Render { path: PathBuf, reason: String },

    /// A question id has no question or ground-truth entry.
    #[error("No question or ground truth for qid {0}")]
    UnknownQuestion(u32),

    /// A document is requested but no question cites it, so it has no membership.
    #[error("No question references document {0}")]
    Unreferenced(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EvalError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a fixture error with path context.
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MalformedFixture {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a remote-service error.
    pub fn remote(status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RemoteService {
            status,
            message: message.into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Transport failures, throttling and server-side errors are retried;
    /// client errors and local failures are not.
    pub fn is_transient(&self) -> bool {
        match self {
            EvalError::Http(_) => true,
            EvalError::RemoteService { status, .. } => {
                matches!(status, None | Some(429) | Some(500..=599))
            }
            _ => false,
        }
    }
}

impl From<reqwest::Error> for EvalError {
    fn from(err: reqwest::Error) -> Self {
        EvalError::Http(err.to_string())
    }
}

impl From<serde_json::Error> for EvalError {
    fn from(err: serde_json::Error) -> Self {
        EvalError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EvalError::Http("connection reset".into()).is_transient());
        assert!(EvalError::remote(Some(503), "unavailable").is_transient());
        assert!(EvalError::remote(Some(429), "slow down").is_transient());
        assert!(!EvalError::remote(Some(401), "bad key").is_transient());
        assert!(!EvalError::MissingFile(PathBuf::from("q.json")).is_transient());
    }

    #[test]
    fn test_remote_display() {
        let err = EvalError::remote(Some(400), "bad filter");
        assert_eq!(err.to_string(), "Remote service error (400): bad filter");
        let err = EvalError::remote(None, "empty body");
        assert_eq!(err.to_string(), "Remote service error: empty body");
    }
}
