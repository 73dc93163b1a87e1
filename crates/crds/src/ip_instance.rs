//! IPInstance CRD
//!
//! Durable binding of one address to one pod. A dual-stack pod owns two.
//! The spec is immutable once created; only status fields change.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "podnet.microscaler.io",
    version = "v1alpha1",
    kind = "IPInstance",
    namespaced,
    status = "IPInstanceStatus",
    printcolumn = r#"{"name":"IP","type":"string","jsonPath":".spec.address.ip"}"#,
    printcolumn = r#"{"name":"Gateway","type":"string","jsonPath":".spec.address.gateway"}"#,
    printcolumn = r#"{"name":"PodName","type":"string","jsonPath":".status.podName"}"#,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".status.nodeName"}"#,
    printcolumn = r#"{"name":"Subnet","type":"string","jsonPath":".spec.subnet"}"#,
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".spec.network"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPInstanceSpec {
    /// Network the address belongs to
    pub network: String,

    /// Subnet the address was allocated from
    pub subnet: String,

    /// Bound address
    pub address: Address,
}

/// Address details of an IPInstance.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    /// Address with prefix length, e.g. `10.0.0.5/24`
    pub ip: String,

    /// Hardware address shared by every address of the pod
    pub mac: String,

    /// Gateway of the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// IP version
    pub version: IPVersion,

    /// VLAN ID or VNI of the subnet
    #[serde(default, rename = "netID", skip_serializing_if = "Option::is_none")]
    pub net_id: Option<i32>,
}

/// IP version, serialized as `"4"` / `"6"`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IPVersion {
    /// IPv4
    #[serde(rename = "4")]
    V4,
    /// IPv6
    #[serde(rename = "6")]
    V6,
}

impl IPVersion {
    /// Version of a parsed address.
    #[must_use]
    pub fn of(addr: &std::net::IpAddr) -> Self {
        if addr.is_ipv4() { Self::V4 } else { Self::V6 }
    }
}

impl std::fmt::Display for IPVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::V4 => f.write_str("4"),
            Self::V6 => f.write_str("6"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IPInstanceStatus {
    /// Node the pod runs on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Binding phase; cleared once the node daemon has wired the address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<IPPhase>,

    /// Pod name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_name: Option<String>,

    /// Pod namespace
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod_namespace: Option<String>,

    /// Sandbox (container) ID the address is wired into
    #[serde(default, rename = "sandboxID", skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,

    /// Last write by the node daemon (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
/// Binding phase
///
/// Serializes as PascalCase but also accepts lowercase.
#[serde(rename_all = "PascalCase")]
pub enum IPPhase {
    /// Coupled to a live pod
    #[serde(alias = "using")]
    Using,

    /// Retained for a stateful identity after its pod was deleted
    #[serde(alias = "reserved")]
    Reserved,
}

impl IPInstance {
    /// Address without the prefix length.
    #[must_use]
    pub fn plain_ip(&self) -> &str {
        self.spec
            .address
            .ip
            .split_once('/')
            .map_or(self.spec.address.ip.as_str(), |(ip, _)| ip)
    }

    /// Whether a deletion timestamp is set.
    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}

/// Resource name for the instance holding `ip`.
///
/// Addresses are unique within a network, so the address itself names the
/// instance: `10.0.0.5` → `10-0-0-5`, `fd00::5` → `fd00--5`.
#[must_use]
pub fn instance_name(ip: &str) -> String {
    let plain = ip.split_once('/').map_or(ip, |(ip, _)| ip);
    plain.replace(['.', ':'], "-")
}
