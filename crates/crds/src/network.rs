//! Network CRD
//!
//! A named network topology. Cluster scoped; subnets reference it by name.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "podnet.microscaler.io",
    version = "v1alpha1",
    kind = "Network",
    status = "NetworkStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"NetID","type":"integer","jsonPath":".spec.netID"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Topology class
    #[serde(rename = "type")]
    pub network_type: NetworkType,

    /// Default VLAN ID / VNI for subnets of this network
    #[serde(default, rename = "netID", skip_serializing_if = "Option::is_none")]
    pub net_id: Option<i32>,

    /// Nodes an underlay network is reachable from
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub node_selector: BTreeMap<String, String>,

    /// Data-plane mode; derived from the type when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<NetworkMode>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatus {
    /// Nodes observed to be attached to this network
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_list: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
/// Network topology class
///
/// Serializes as PascalCase but also accepts lowercase.
pub enum NetworkType {
    /// Host-routed, bound to physical nodes
    #[default]
    #[serde(alias = "underlay")]
    Underlay,

    /// Encapsulated fabric spanning the cluster
    #[serde(alias = "overlay")]
    Overlay,

    /// Route-advertised fabric spanning the cluster
    #[serde(rename = "GlobalBGP", alias = "globalbgp")]
    GlobalBGP,
}

impl NetworkType {
    /// Parses a pod hint. An empty hint means `Underlay`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "" | "underlay" => Some(Self::Underlay),
            "overlay" => Some(Self::Overlay),
            "globalbgp" => Some(Self::GlobalBGP),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetworkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Underlay => f.write_str("Underlay"),
            Self::Overlay => f.write_str("Overlay"),
            Self::GlobalBGP => f.write_str("GlobalBGP"),
        }
    }
}

/// Data-plane mode handed to interface configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum NetworkMode {
    /// VLAN sub-interface on the host uplink
    #[serde(rename = "VLAN")]
    Vlan,
    /// Host-routed with BGP peering
    #[serde(rename = "BGP")]
    Bgp,
    /// VXLAN encapsulation
    #[serde(rename = "VXLAN")]
    Vxlan,
    /// Route-advertised cluster fabric
    #[serde(rename = "GlobalBGP")]
    GlobalBgp,
}

impl std::fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Vlan => f.write_str("VLAN"),
            Self::Bgp => f.write_str("BGP"),
            Self::Vxlan => f.write_str("VXLAN"),
            Self::GlobalBgp => f.write_str("GlobalBGP"),
        }
    }
}

impl Network {
    /// Effective data-plane mode.
    #[must_use]
    pub fn mode(&self) -> NetworkMode {
        self.spec.mode.unwrap_or(match self.spec.network_type {
            NetworkType::Underlay => NetworkMode::Vlan,
            NetworkType::Overlay => NetworkMode::Vxlan,
            NetworkType::GlobalBGP => NetworkMode::GlobalBgp,
        })
    }
}
