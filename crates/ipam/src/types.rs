//! Shared IPAM types.

use crate::error::IpamError;
use crds::IPVersion;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Address families a pod asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum IpFamilyMode {
    /// One IPv4 address
    #[default]
    IPv4,
    /// One IPv6 address
    IPv6,
    /// One IPv4 and one IPv6 address
    DualStack,
}

impl IpFamilyMode {
    /// Parses a pod hint. An empty hint means `IPv4`; unknown values are `None`.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "" | "ipv4" => Some(Self::IPv4),
            "ipv6" => Some(Self::IPv6),
            "dualstack" => Some(Self::DualStack),
            _ => None,
        }
    }

    /// Versions requested, IPv4 first.
    #[must_use]
    pub fn versions(self) -> &'static [IPVersion] {
        match self {
            Self::IPv4 => &[IPVersion::V4],
            Self::IPv6 => &[IPVersion::V6],
            Self::DualStack => &[IPVersion::V4, IPVersion::V6],
        }
    }

    /// Number of addresses a pod of this family holds.
    #[must_use]
    pub fn expected_count(self) -> usize {
        self.versions().len()
    }
}

impl std::fmt::Display for IpFamilyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IPv4 => f.write_str("IPv4"),
            Self::IPv6 => f.write_str("IPv6"),
            Self::DualStack => f.write_str("DualStack"),
        }
    }
}

/// Result of an engine call. Not durable until coupled into the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedIP {
    /// Network name
    pub network: String,
    /// Subnet name
    pub subnet: String,
    /// Address with the subnet's prefix length
    pub address: IpNet,
    /// Subnet gateway
    pub gateway: Option<IpAddr>,
    /// VLAN ID / VNI
    pub net_id: Option<i32>,
}

impl AllocatedIP {
    /// Bare address.
    #[must_use]
    pub fn ip(&self) -> IpAddr {
        self.address.addr()
    }

    /// IP version of the address.
    #[must_use]
    pub fn version(&self) -> IPVersion {
        IPVersion::of(&self.ip())
    }
}

impl std::fmt::Display for AllocatedIP {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address.addr())
    }
}

/// Outcome of an engine `assign`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Assignment {
    /// Assigned addresses, in candidate order
    pub ips: Vec<AllocatedIP>,
    /// The subset that was free before the call. Only these may be released
    /// when the assignment is abandoned; the rest were already held.
    pub newly_used: Vec<AllocatedIP>,
}

/// Parses and re-renders an address so padded or uncompressed input compares
/// equal to stored values.
pub fn normalize_ip(value: &str) -> Result<String, IpamError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map(|ip| ip.to_string())
        .map_err(|_| IpamError::InvalidIP(value.to_string()))
}

/// Bare addresses of a list of allocations, in order.
#[must_use]
pub fn squash_ips(ips: &[AllocatedIP]) -> Vec<String> {
    ips.iter().map(|ip| ip.ip().to_string()).collect()
}

/// Subnet names of a list of allocations, in order.
#[must_use]
pub fn squash_subnets(ips: &[AllocatedIP]) -> Vec<String> {
    ips.iter().map(|ip| ip.subnet.clone()).collect()
}
