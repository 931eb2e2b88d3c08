//! # Error Handling
//!
//! Error taxonomy for Strata operations.
//!
//! ## Design Principles
//!
//! 1. **Typed signals stay out of here**: a fatal partition timeout is an
//!    `Option::None` from the solver and a `partial` flag on the result, not an error
//! 2. **Contextual**: errors carry the partition coordinate they concern
//! 3. **Recoverable vs fatal**: callers can ask `is_recoverable()` before retrying
//!    against another replica or partition

use thiserror::Error;

use crate::types::{LifecycleState, PartitionCoordinate, TenantId};

/// Result type alias for Strata operations
pub type Result<T> = std::result::Result<T, Error>;

/// Primary error type for Strata
#[derive(Error, Debug)]
pub enum Error {
    // Lifecycle Errors
    #[error("Partition {coordinate} unavailable (state: {state})")]
    PartitionUnavailable {
        coordinate: PartitionCoordinate,
        state: LifecycleState,
    },

    #[error("Partition {coordinate} has been destroyed")]
    PartitionDestroyed { coordinate: PartitionCoordinate },

    #[error("Illegal transition for {coordinate}: {from} -> {to}")]
    IllegalTransition {
        coordinate: PartitionCoordinate,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("No schema registered for tenant {tenant}")]
    SchemaUnavailable { tenant: TenantId },

    // Query Errors
    #[error("Replica attempt against {coordinate} failed: {message}")]
    ReplicaAttemptFailed {
        coordinate: PartitionCoordinate,
        message: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    // Collaborator Errors
    #[error("Index storage error: {message}")]
    IndexStorage { message: String },

    // System Errors
    #[error("IO error: {message}")]
    Io { message: String, source: std::io::Error },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl Error {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::PartitionUnavailable { .. } => true,
            Error::SchemaUnavailable { .. } => true,
            Error::ReplicaAttemptFailed { .. } => true,
            Error::Cancelled => true,
            Error::PartitionDestroyed { .. } => false,
            Error::IllegalTransition { .. } => false,
            Error::Configuration { .. } => false,
            Error::Io { .. } => false,
            _ => true,
        }
    }

    /// Get error code for monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::PartitionUnavailable { .. } => "PARTITION_UNAVAILABLE",
            Error::PartitionDestroyed { .. } => "PARTITION_DESTROYED",
            Error::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Error::SchemaUnavailable { .. } => "SCHEMA_UNAVAILABLE",
            Error::ReplicaAttemptFailed { .. } => "REPLICA_ATTEMPT_FAILED",
            Error::Cancelled => "CANCELLED",
            Error::IndexStorage { .. } => "INDEX_STORAGE_ERROR",
            Error::Io { .. } => "IO_ERROR",
            Error::Configuration { .. } => "CONFIG_ERROR",
            Error::Internal { .. } => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

/// Extension trait for adding context to results
pub trait ResultExt<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| Error::Internal {
            message: format!("{}: {}", f(), e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{HostId, PartitionId};

    fn coordinate() -> PartitionCoordinate {
        PartitionCoordinate::new(TenantId::new("acme"), PartitionId(7), HostId::new("h1"))
    }

    #[test]
    fn test_unavailable_is_recoverable() {
        let err = Error::PartitionUnavailable {
            coordinate: coordinate(),
            state: LifecycleState::Offline,
        };
        assert!(err.is_recoverable());
        assert_eq!(err.error_code(), "PARTITION_UNAVAILABLE");
        assert_eq!(err.to_string(), "Partition acme/7@h1 unavailable (state: offline)");
    }

    #[test]
    fn test_destroyed_is_fatal() {
        let err = Error::PartitionDestroyed { coordinate: coordinate() };
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_schema_unavailable_is_transient() {
        let err = Error::SchemaUnavailable { tenant: TenantId::new("acme") };
        assert!(err.is_recoverable());
        assert_eq!(err.error_code(), "SCHEMA_UNAVAILABLE");
        assert_eq!(err.to_string(), "No schema registered for tenant acme");
    }

    #[test]
    fn test_with_context() {
        let result: Result<()> = Err(Error::IndexStorage { message: "disk full".into() });
        let err = result.with_context(|| "migrating acme/7".to_string()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Internal error: migrating acme/7: Index storage error: disk full"
        );
    }
}
