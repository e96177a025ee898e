//! Error types for the controller.
//!
//! Errors are classified so the reconciler and the controller's error policy
//! can decide between retrying, waiting for a spec change, or backing off.

use std::time::Duration;
use thiserror::Error;

use crate::config::ConfigError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error that does not map to a more specific variant
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// The parent resource's spec cannot be turned into child objects
    #[error("invalid spec for {parent}: {field}: {reason}")]
    InvalidSpec {
        parent: String,
        field: String,
        reason: String,
    },

    /// Create raced with another writer
    #[error("{kind} {name} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Optimistic-concurrency conflict on replace
    #[error("conflict writing {kind} {name}")]
    Conflict { kind: String, name: String },

    /// Transient store failure (throttling, unavailable API server)
    #[error("Transient error: {0}")]
    Transient(String),

    /// The reconcile pass was cancelled
    #[error("reconcile cancelled")]
    Cancelled,

    /// The reconcile pass ran past its deadline
    #[error("reconcile deadline exceeded")]
    DeadlineExceeded,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid operator configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Build an [`Error::InvalidSpec`].
    pub fn invalid_spec(
        parent: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::InvalidSpec {
            parent: parent.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_)
            | Error::Conflict { .. }
            | Error::AlreadyExists { .. }
            | Error::DeadlineExceeded => true,
            Error::InvalidSpec { .. }
            | Error::Cancelled
            | Error::Serialization(_)
            | Error::Config(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
