//! Subnet CRD
//!
//! A CIDR range inside a Network. The unit addresses are allocated from.

use crate::ip_instance::IPVersion;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "podnet.microscaler.io",
    version = "v1alpha1",
    kind = "Subnet",
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".spec.range.version"}"#,
    printcolumn = r#"{"name":"CIDR","type":"string","jsonPath":".spec.range.cidr"}"#,
    printcolumn = r#"{"name":"Network","type":"string","jsonPath":".spec.network"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Owning network
    pub network: String,

    /// VLAN ID / VNI; inherits the network's when unset
    #[serde(default, rename = "netID", skip_serializing_if = "Option::is_none")]
    pub net_id: Option<i32>,

    /// Address range
    pub range: AddressRange,
}

/// Allocatable range of a subnet.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AddressRange {
    /// IP version of the range
    pub version: IPVersion,

    /// CIDR, e.g. `10.0.0.0/24`
    pub cidr: String,

    /// Gateway; never handed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// First allocatable address (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    /// Last allocatable address (inclusive)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,

    /// Addresses only handed out by forced assignment
    #[serde(default, rename = "reservedIPs", skip_serializing_if = "Vec::is_empty")]
    pub reserved_ips: Vec<String>,

    /// Addresses never handed out
    #[serde(default, rename = "excludeIPs", skip_serializing_if = "Vec::is_empty")]
    pub exclude_ips: Vec<String>,
}
