// Error taxonomy for dashboard operations
//
// Every core operation (session lifecycle, configuration store, batch-size
// resolver, metrics) reports failures through `DashboardError`. Infrastructure
// code underneath (file I/O, process spawning) keeps using `anyhow` and is
// folded into `Storage` or `LaunchFailed` at the boundary.

use thiserror::Error;

/// Structured error returned by every core operation
#[derive(Error, Debug)]
pub enum DashboardError {
    /// Malformed input, rejected before any state mutation
    #[error("invalid {field}: {message}")]
    Validation { field: String, message: String },

    /// Non-positive, non-integer or out-of-range numeric argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Requested transition is not legal from the current state
    #[error("conflict: {0}")]
    Conflict(String),

    /// Named entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Operation is never allowed on this entity (e.g. the default config)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Save without overwrite onto an existing name
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The job-launch collaborator reported a setup failure
    #[error("launch failed: {0}")]
    LaunchFailed(String),

    /// Backing blob store failed
    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl DashboardError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Stable snake_case identifier used on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::Conflict(_) => "conflict",
            Self::NotFound(_) => "not_found",
            Self::Forbidden(_) => "forbidden",
            Self::AlreadyExists(_) => "already_exists",
            Self::LaunchFailed(_) => "launch_failed",
            Self::Storage(_) => "storage",
        }
    }

    /// Whether the caller can retry after re-checking status
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_) | Self::Storage(_))
    }
}

/// Result alias for dashboard operations
pub type Result<T> = std::result::Result<T, DashboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_message_names_field() {
        let err = DashboardError::validation("wrappers", "unknown capability 'Foo'");
        assert_eq!(err.to_string(), "invalid wrappers: unknown capability 'Foo'");
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn test_storage_wraps_anyhow_chain() {
        let inner = anyhow::anyhow!("disk full").context("Failed to write foo.json");
        let err = DashboardError::Storage(inner);
        let msg = err.to_string();
        assert!(msg.contains("Failed to write foo.json"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(DashboardError::Conflict("busy".into()).is_retryable());
        assert!(!DashboardError::NotFound("x".into()).is_retryable());
        assert!(!DashboardError::Forbidden("default".into()).is_retryable());
    }
}
