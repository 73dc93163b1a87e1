//! Wire types of the local handshake API.
//!
//! Field names are snake_case on the wire; the network plugin binary
//! depends on them.

use crds::IPVersion;
use crds::constants::DEFAULT_INTERFACE_NAME;
use serde::{Deserialize, Serialize};

/// Interface add/del request (CNI style).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodRequest {
    /// Pod name
    pub pod_name: String,
    /// Pod namespace
    pub pod_namespace: String,
    /// Sandbox container ID
    #[serde(default)]
    pub container_id: String,
    /// Path of the sandbox network namespace
    #[serde(default)]
    pub net_ns: String,
}

/// One address as handed to the plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IPAddress {
    /// Address with prefix length
    pub ip: String,
    /// Hardware address of the pod interface
    pub mac: String,
    /// Gateway, empty when the subnet has none
    #[serde(default)]
    pub gateway: String,
    /// IP version
    pub protocol: IPVersion,
}

/// Interface add response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodResponse {
    /// Configured addresses
    #[serde(rename = "address", default)]
    pub address: Vec<IPAddress>,
    /// Host side of the pod interface
    #[serde(default)]
    pub host_interface: String,
    /// Failure message, empty on success
    #[serde(default)]
    pub error: String,
}

/// Address-only add/del request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodIPAMRequest {
    /// Pod name
    pub pod_name: String,
    /// Pod namespace
    pub pod_namespace: String,
    /// Pod interface the addresses belong to
    #[serde(default = "default_interface_name")]
    pub interface_name: String,
    /// Sandbox container ID
    #[serde(default)]
    pub container_id: String,
}

fn default_interface_name() -> String {
    DEFAULT_INTERFACE_NAME.to_string()
}

/// Address-only add response.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PodIPAMResponse {
    /// Bound addresses
    #[serde(default)]
    pub addresses: Vec<IPAddress>,
    /// Failure message, empty on success
    #[serde(default)]
    pub error: String,
}

/// Body of every failed request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Failure message
    pub error: String,
}
