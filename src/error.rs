//! Error types for the VMAX storage driver
//!
//! Provides structured error types for the array client, the attachment
//! orchestrator, the volume lifecycle manager and the local executor.

use thiserror::Error;

/// Unified error type for the driver
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Array Resource Errors
    // =========================================================================
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    #[error("Resource conflict: {kind}/{name}: {reason}")]
    Conflict {
        kind: String,
        name: String,
        reason: String,
    },

    #[error("Array operation failed: {operation} on {target}: {reason}")]
    Array {
        operation: String,
        target: String,
        reason: String,
    },

    #[error("Array transport error: {0}")]
    Transport(#[from] reqwest::Error),

    // =========================================================================
    // Orchestration Errors
    // =========================================================================
    #[error("Volume {volume_id} is not visible to initiator {initiator} after attach")]
    AttachmentNotVisible { volume_id: String, initiator: String },

    #[error("Operation not supported by the vmax driver: {operation}")]
    Unsupported { operation: String },

    // =========================================================================
    // Executor Errors
    // =========================================================================
    #[error("Host identity discovery failed: {0}")]
    HostIdentity(String),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification used by callers that branch on failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing or invalid parameter, reported before touching the array
    Configuration,
    /// Array resource is absent
    NotFound,
    /// Array resource exists in an incompatible state
    Conflict,
    /// Operation deliberately not implemented
    Unsupported,
    /// Array, transport or local failure
    Failure,
}

impl Error {
    /// Build a not-found error for an array resource
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Build an unsupported-operation error
    pub fn unsupported(operation: impl Into<String>) -> Self {
        Error::Unsupported {
            operation: operation.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Unsupported { .. } => ErrorKind::Unsupported,
            _ => ErrorKind::Failure,
        }
    }

    /// Check if the array reported the resource as absent
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    /// Annotate a failure with the operation and target being processed.
    ///
    /// Classified errors keep their kind so callers can still branch on them.
    pub fn context(self, operation: &str, target: &str) -> Self {
        match self {
            Error::Configuration(_)
            | Error::NotFound { .. }
            | Error::Conflict { .. }
            | Error::Unsupported { .. }
            | Error::AttachmentNotVisible { .. }
            | Error::Array { .. } => self,
            other => Error::Array {
                operation: operation.to_string(),
                target: target.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Extension for attaching operation context to results
pub trait ResultExt<T> {
    /// See [`Error::context`]
    fn context(self, operation: &str, target: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, operation: &str, target: &str) -> Result<T> {
        self.map_err(|e| e.context(operation, target))
    }
}

/// Result type alias for the driver
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            Error::Configuration("no size".into()).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            Error::not_found("StorageGroup", "sg1").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            Error::unsupported("volume_copy").kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(Error::Internal("boom".into()).kind(), ErrorKind::Failure);
    }

    #[test]
    fn test_context_keeps_not_found() {
        let err = Error::not_found("Volume", "00123").context("delete_volume", "00123");
        assert!(err.is_not_found());
    }

    #[test]
    fn test_context_wraps_failures() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "reset");
        let err = Error::from(io).context("get_host", "host_IG");
        match err {
            Error::Array {
                operation, target, ..
            } => {
                assert_eq!(operation, "get_host");
                assert_eq!(target, "host_IG");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
