//! Pod network intent.
//!
//! Annotations and labels on a pod form a weakly typed config channel. They
//! are resolved once per event into a [`PodNetworkIntent`] and every decision
//! point reads the typed value instead of the raw maps.

use crate::error::IpamError;
use crate::types::{IpFamilyMode, normalize_ip};
use crds::NetworkType;
use crds::constants::{
    ANNOTATION_HANDLED_BY_WEBHOOK, ANNOTATION_IP, ANNOTATION_IP_FAMILY, ANNOTATION_IP_POOL,
    ANNOTATION_IP_RETAIN, ANNOTATION_NETWORK_TYPE, ANNOTATION_SPECIFIED_NETWORK,
    ANNOTATION_SPECIFIED_SUBNET, LABEL_IP_FAMILY, LABEL_NETWORK_TYPE, LABEL_SPECIFIED_NETWORK,
    LABEL_SPECIFIED_SUBNET,
};
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;

/// A parsed hint, or the raw value that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hint<T> {
    /// Parsed value
    Valid(T),
    /// Raw value that is not understood
    Invalid(String),
}

impl<T: Copy> Hint<T> {
    /// Parsed value, if any.
    pub fn valid(&self) -> Option<T> {
        match self {
            Hint::Valid(value) => Some(*value),
            Hint::Invalid(_) => None,
        }
    }
}

/// Whether addresses of a stateful identity survive pod recreation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Reuse the previously coupled addresses
    Retain,
    /// Release the previous addresses and allocate fresh ones
    Reallocate,
}

impl Retention {
    /// Combines the cluster default with the pod override.
    ///
    /// The override, when present, always wins; absence defers to the default.
    #[must_use]
    pub fn resolve(cluster_default_retain: bool, pod_override: Option<bool>) -> Self {
        if pod_override.unwrap_or(cluster_default_retain) {
            Retention::Retain
        } else {
            Retention::Reallocate
        }
    }
}

/// Everything a pod declares about its networking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodNetworkIntent {
    /// Explicit network name
    pub network: Option<String>,
    /// Explicit subnet name(s), raw
    pub subnet: Option<String>,
    /// Network type hint; an absent hint means `Underlay`
    pub network_type: Hint<NetworkType>,
    /// IP family hint; an absent hint means `IPv4`
    pub ip_family: Hint<IpFamilyMode>,
    /// Pre-assigned addresses, one entry per ordinal
    pub ip_pool: Vec<String>,
    /// Retention override
    pub retain: Option<bool>,
    /// Address-assigned fence
    pub assigned: bool,
    /// IP family annotation already finalized by admission
    pub handled_by_webhook: bool,
}

impl PodNetworkIntent {
    /// Resolves the intent of a pod. Annotations take priority over labels.
    #[must_use]
    pub fn from_pod(pod: &Pod) -> Self {
        let empty = BTreeMap::new();
        let annotations = pod.metadata.annotations.as_ref().unwrap_or(&empty);
        let labels = pod.metadata.labels.as_ref().unwrap_or(&empty);

        let pick = |annotation: &str, label: &str| -> Option<String> {
            annotations
                .get(annotation)
                .filter(|v| !v.is_empty())
                .or_else(|| labels.get(label).filter(|v| !v.is_empty()))
                .cloned()
        };

        let network_type_raw = pick(ANNOTATION_NETWORK_TYPE, LABEL_NETWORK_TYPE).unwrap_or_default();
        let network_type = NetworkType::parse(&network_type_raw)
            .map_or(Hint::Invalid(network_type_raw), Hint::Valid);

        let ip_family_raw = pick(ANNOTATION_IP_FAMILY, LABEL_IP_FAMILY).unwrap_or_default();
        let ip_family = IpFamilyMode::parse(&ip_family_raw)
            .map_or(Hint::Invalid(ip_family_raw), Hint::Valid);

        let ip_pool = annotations
            .get(ANNOTATION_IP_POOL)
            .map(|pool| {
                pool.split(',')
                    .map(str::trim)
                    .filter(|entry| !entry.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Self {
            network: pick(ANNOTATION_SPECIFIED_NETWORK, LABEL_SPECIFIED_NETWORK),
            subnet: pick(ANNOTATION_SPECIFIED_SUBNET, LABEL_SPECIFIED_SUBNET),
            network_type,
            ip_family,
            ip_pool,
            retain: annotations
                .get(ANNOTATION_IP_RETAIN)
                .and_then(|v| parse_bool(v)),
            assigned: annotations.contains_key(ANNOTATION_IP),
            handled_by_webhook: annotations
                .get(ANNOTATION_HANDLED_BY_WEBHOOK)
                .and_then(|v| parse_bool(v))
                .unwrap_or(false),
        }
    }

    /// Family to allocate for. Outside dual-stack mode everything is IPv4.
    pub fn family(&self, dual_stack: bool) -> Result<IpFamilyMode, IpamError> {
        if !dual_stack {
            return Ok(IpFamilyMode::IPv4);
        }
        match &self.ip_family {
            Hint::Valid(family) => Ok(*family),
            Hint::Invalid(raw) => Err(IpamError::FamilyMismatch(format!("unknown ip family {raw:?}"))),
        }
    }

    /// Subnet hints; `v4/v6` is split per family in dual-stack mode.
    #[must_use]
    pub fn subnet_names(&self, dual_stack: bool) -> Vec<String> {
        match &self.subnet {
            None => Vec::new(),
            Some(subnet) if dual_stack => subnet.split('/').map(ToString::to_string).collect(),
            Some(subnet) => vec![subnet.clone()],
        }
    }

    /// Whether a pre-assignment pool is declared.
    #[must_use]
    pub fn has_ip_pool(&self) -> bool {
        !self.ip_pool.is_empty()
    }

    /// Pool entry for `ordinal`, normalized. Dual-stack entries are `v4/v6`.
    pub fn pool_candidates(&self, ordinal: usize, dual_stack: bool) -> Result<Vec<String>, IpamError> {
        let entry = self.ip_pool.get(ordinal).ok_or_else(|| {
            IpamError::NotAssignable {
                ip: format!("ordinal {ordinal}"),
                network: format!("ip-pool {}", self.ip_pool.join(",")),
            }
        })?;

        if dual_stack {
            entry.split('/').map(normalize_ip).collect()
        } else {
            Ok(vec![normalize_ip(entry)?])
        }
    }

    /// Retention decision under the given cluster default.
    #[must_use]
    pub fn retention(&self, cluster_default_retain: bool) -> Retention {
        Retention::resolve(cluster_default_retain, self.retain)
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "t" => Some(true),
        "false" | "0" | "f" => Some(false),
        _ => None,
    }
}
