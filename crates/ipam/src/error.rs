//! IPAM errors

use thiserror::Error;

/// Errors raised by the allocation engine and the binding store
#[derive(Debug, Error)]
pub enum IpamError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No subnet of the network is known to the engine
    #[error("Network not found: {0}")]
    NetworkNotFound(String),

    /// Named subnet unknown or not part of the requested network
    #[error("Subnet not found: {0}")]
    SubnetNotFound(String),

    /// Every candidate subnet is exhausted
    #[error("No available IP in network {network} for IPv{version}")]
    NoAvailableIP {
        /// Network allocated from
        network: String,
        /// Requested IP version
        version: crds::IPVersion,
    },

    /// Address held by another pod
    #[error("IP {ip} is already in use by {owner}")]
    IPInUse {
        /// Requested address
        ip: String,
        /// Current holder (`namespace/name`)
        owner: String,
    },

    /// Address outside every subnet of the network, or excluded
    #[error("IP {ip} is not assignable in network {network}")]
    NotAssignable {
        /// Requested address
        ip: String,
        /// Network searched
        network: String,
    },

    /// Unparseable address or CIDR
    #[error("Invalid IP address: {0}")]
    InvalidIP(String),

    /// Address count does not match the requested IP family
    #[error("IP family mismatch: {0}")]
    FamilyMismatch(String),

    /// Malformed subnet definition
    #[error("Invalid subnet {name}: {reason}")]
    InvalidSubnet {
        /// Subnet name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// Pod object lacks a field the store relies on
    #[error("Invalid pod: {0}")]
    InvalidPod(String),
}

impl IpamError {
    /// Whether the error is an optimistic-concurrency conflict (HTTP 409).
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, IpamError::Kube(kube::Error::Api(resp)) if resp.code == 409)
    }

    /// Whether the error is a missing object (HTTP 404).
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, IpamError::Kube(kube::Error::Api(resp)) if resp.code == 404)
    }
}
