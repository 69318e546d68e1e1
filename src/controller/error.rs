//! Error types for rendering and reconciliation.
//!
//! A single error enum is shared by the renderer and the controller so that
//! the first failure during a render propagates unchanged to the error policy.

use std::time::Duration;
use thiserror::Error;

/// Requeue delay for errors that are expected to clear on their own.
const RETRY_REQUEUE: Duration = Duration::from_secs(30);
/// Requeue delay for errors that need a spec change or manual intervention.
const PERMANENT_REQUEUE: Duration = Duration::from_secs(300);

/// Error type for operator operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing required field in the resource spec
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Invalid value in the resource spec
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Permanent error that should not be retried
    #[error("Permanent error: {0}")]
    Permanent(String),

    /// Manifest (de)serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML document generation error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Treat a 404 from a child object as retryable.
    ///
    /// Only a 404 on the MultiClusterObservability itself means the resource
    /// is gone. Writing a child can also 404, e.g. when the target namespace
    /// does not exist yet, and that must be reported and retried.
    pub fn not_found_as_transient(self, object: &str) -> Self {
        if self.is_not_found() {
            Error::Transient(format!("{}: {}", object, self))
        } else {
            self
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_) => true,
            Error::Validation(_) | Error::Permanent(_) | Error::MissingField(_) => false,
            Error::Serialization(_) | Error::Yaml(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            RETRY_REQUEUE
        } else {
            PERMANENT_REQUEUE
        }
    }

    /// Short machine-readable reason, used for status conditions and events.
    pub fn reason(&self) -> &'static str {
        match self {
            Error::Kube(_) => "KubernetesError",
            Error::MissingField(_) => "MissingConfiguration",
            Error::Validation(_) => "InvalidSpec",
            Error::Transient(_) => "Transient",
            Error::Permanent(_) => "Permanent",
            Error::Serialization(_) | Error::Yaml(_) => "RenderFailed",
        }
    }
}

/// Result type alias for operator operations
pub type Result<T> = std::result::Result<T, Error>;
