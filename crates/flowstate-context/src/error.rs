//! Context store error types.

use thiserror::Error;

/// Result type for context store operations.
pub type ContextResult<T> = Result<T, ContextError>;

/// Errors that can occur during context store operations.
#[derive(Debug, Error)]
pub enum ContextError {
    /// Property path is empty or contains an empty/whitespace segment.
    #[error("Invalid property path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// Scope identifier cannot be mapped to a backing file.
    #[error("Invalid scope {scope:?}: {reason}")]
    InvalidScope { scope: String, reason: &'static str },

    /// Backing file exists but does not contain a JSON object.
    #[error("Corrupt context file {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// IO error (permission denied, disk full, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error while saving
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A synchronous accessor was called on a store without the cache.
    #[error("{0} requires the in-memory cache to be enabled")]
    CacheRequired(&'static str),

    /// Operation issued before `open()` or after `close()`.
    #[error("Context store is not open")]
    NotOpen,

    /// The write queue for a file went away before replying.
    #[error("Write queue for {0} closed before completing")]
    QueueClosed(String),

    /// Lock was poisoned (another thread panicked while holding the lock)
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

impl ContextError {
    /// Create an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    /// Create an invalid scope error.
    pub fn invalid_scope(scope: impl Into<String>, reason: &'static str) -> Self {
        Self::InvalidScope {
            scope: scope.into(),
            reason,
        }
    }

    /// Whether this error reports unparsable file content.
    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::Corrupt { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_path_formats_path_and_reason() {
        let err = ContextError::invalid_path("foo..bar", "empty segment");
        assert_eq!(
            err.to_string(),
            "Invalid property path \"foo..bar\": empty segment"
        );
    }

    #[test]
    fn invalid_scope_formats_scope() {
        let err = ContextError::invalid_scope("flow:abc", "node id 'flow' is reserved");
        assert!(err.to_string().contains("\"flow:abc\""));
    }

    #[test]
    fn corrupt_keeps_json_source() {
        let json_err = serde_json::from_str::<serde_json::Value>("{abc").unwrap_err();
        let err = ContextError::Corrupt {
            path: "contexts/nodeX/flow.json".to_string(),
            source: json_err,
        };
        assert!(err.is_corrupt());
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("Corrupt context file contexts/nodeX/flow.json"));
    }

    #[test]
    fn io_wraps_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ContextError::from(io_err);
        assert!(err.to_string().contains("IO error"));
        assert!(!err.is_corrupt());
    }

    #[test]
    fn cache_required_names_operation() {
        let err = ContextError::CacheRequired("get_now");
        assert_eq!(
            err.to_string(),
            "get_now requires the in-memory cache to be enabled"
        );
    }
}
