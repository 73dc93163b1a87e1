//! Controller-specific error types.

use ipam::IpamError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Pod IPAM Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Engine or store error, attributed to the operation and pod
    #[error("{op} failed for pod {pod}: {source}")]
    Ipam {
        /// Operation that failed
        op: &'static str,
        /// `namespace/name`
        pod: String,
        /// Underlying error
        #[source]
        source: IpamError,
    },

    /// No network matches the pod's declared intent
    #[error("Network selection failed for pod {pod}: {reason}")]
    Selection {
        /// `namespace/name`
        pod: String,
        /// What was looked up
        reason: String,
    },

    /// Optimistic-concurrency retries used up
    #[error("Conflict retries exhausted: {0}")]
    ConflictRetriesExhausted(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Wraps an engine/store error with the operation and pod it concerns.
    pub fn ipam(op: &'static str, pod: impl Into<String>, source: IpamError) -> Self {
        ControllerError::Ipam {
            op,
            pod: pod.into(),
            source,
        }
    }
}
