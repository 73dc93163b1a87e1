//! Daemon errors
//!
//! Every error maps to the HTTP status the network plugin sees: problems
//! with the request or with waiting for the controller are 400, broken
//! cluster state and local configuration failures are 500.

use crate::request::ErrorResponse;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

/// Errors raised while serving a handshake
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Body could not be decoded
    #[error("failed to parse {op} request: {reason}")]
    InvalidRequest {
        /// Endpoint
        op: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Pod could not be read from the API server
    #[error("failed to get pod {pod}: {reason}")]
    PodLookup {
        /// `namespace/name`
        pod: String,
        /// Cause
        reason: String,
    },

    /// Pod asks for an IP family that does not exist
    #[error("invalid ip family for pod {pod}: {reason}")]
    InvalidFamily {
        /// `namespace/name`
        pod: String,
        /// Offending value
        reason: String,
    },

    /// Bindings could not be listed
    #[error("failed to list ip instances for pod {pod}: {reason}")]
    ListInstances {
        /// `namespace/name`
        pod: String,
        /// Cause
        reason: String,
    },

    /// Bindings did not show up in time
    #[error("failed to wait for pod {pod} to be coupled with ip, expect {expected} and get {observed}")]
    NotConverged {
        /// `namespace/name`
        pod: String,
        /// Addresses the IP family calls for
        expected: usize,
        /// Bindings seen on the last attempt
        observed: usize,
    },

    /// Bindings contradict each other
    #[error("inconsistent ip instances for pod {pod}: {reason}")]
    Inconsistent {
        /// `namespace/name`
        pod: String,
        /// What does not match
        reason: String,
    },

    /// Network of the bindings could not be read
    #[error("cannot get network {network}: {reason}")]
    NetworkLookup {
        /// Network name
        network: String,
        /// Cause
        reason: String,
    },

    /// Interface setup or teardown failed
    #[error("failed to configure nic: {0}")]
    Nic(String),

    /// Status write-back failed
    #[error("failed to update IPInstance {instance}: {reason}")]
    StatusUpdate {
        /// `namespace/name` of the instance
        instance: String,
        /// Cause
        reason: String,
    },

    /// Pod annotation patch failed
    #[error("failed to patch pod {pod}: {reason}")]
    PodPatch {
        /// `namespace/name`
        pod: String,
        /// Cause
        reason: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    /// HTTP status reported for this error.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest { .. }
            | Self::PodLookup { .. }
            | Self::InvalidFamily { .. }
            | Self::ListInstances { .. }
            | Self::NotConverged { .. } => StatusCode::BAD_REQUEST,
            Self::Inconsistent { .. }
            | Self::NetworkLookup { .. }
            | Self::Nic(_)
            | Self::StatusUpdate { .. }
            | Self::PodPatch { .. }
            | Self::InvalidConfig(_)
            | Self::Kube(_)
            | Self::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for DaemonError {
    fn into_response(self) -> Response {
        error!("handler error: {}", self);
        let body = Json(ErrorResponse { error: self.to_string() });
        (self.status(), body).into_response()
    }
}
