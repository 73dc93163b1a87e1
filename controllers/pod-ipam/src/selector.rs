//! Network selection.
//!
//! Picks the network a pod allocates from. An explicit network name wins;
//! otherwise the network type decides: underlay networks are looked up by the
//! pod's node, overlay and global-BGP networks by their role.

use crate::error::ControllerError;
use crds::{Network, NetworkType};
use ipam::PodNetworkIntent;
use ipam::intent::Hint;
use ipam::pod::{node_name, pod_key};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use kube_runtime::reflector::{ObjectRef, Store};
use std::sync::Arc;

/// Read-only lookup from node or role to network name.
pub trait NetworkIndex: Send + Sync {
    /// Underlay network reachable from `node`.
    fn network_for_node(&self, node: &str) -> Option<String>;

    /// Cluster-wide network serving `role` (overlay or global BGP).
    fn network_for_role(&self, role: NetworkType) -> Option<String>;
}

/// Resolves the network of a pod, or fails with a descriptive error.
pub fn select_network(
    intent: &PodNetworkIntent,
    pod: &Pod,
    index: &dyn NetworkIndex,
) -> Result<String, ControllerError> {
    if let Some(network) = &intent.network {
        return Ok(network.clone());
    }

    let fail = |reason: String| ControllerError::Selection {
        pod: pod_key(pod),
        reason,
    };

    match &intent.network_type {
        Hint::Valid(NetworkType::Underlay) => {
            let node = node_name(pod).ok_or_else(|| fail("pod is not scheduled to a node".to_string()))?;
            index
                .network_for_node(node)
                .ok_or_else(|| fail(format!("no underlay network found for node {node}")))
        }
        Hint::Valid(role) => index
            .network_for_role(*role)
            .ok_or_else(|| fail(format!("no {role} network found"))),
        Hint::Invalid(raw) => Err(fail(format!("unknown network type {raw:?}"))),
    }
}

/// Network index backed by reflector caches of Networks and Nodes.
#[derive(Clone)]
pub struct ReflectorNetworkIndex {
    networks: Store<Network>,
    nodes: Store<Node>,
}

impl ReflectorNetworkIndex {
    pub fn new(networks: Store<Network>, nodes: Store<Node>) -> Self {
        Self { networks, nodes }
    }

    /// Networks of a type, ordered by name.
    fn of_type(&self, network_type: NetworkType) -> Vec<Arc<Network>> {
        let mut networks: Vec<Arc<Network>> = self
            .networks
            .state()
            .into_iter()
            .filter(|network| network.spec.network_type == network_type)
            .collect();
        networks.sort_by_key(|network| network.name_any());
        networks
    }
}

impl NetworkIndex for ReflectorNetworkIndex {
    fn network_for_node(&self, node: &str) -> Option<String> {
        let labels = self
            .nodes
            .get(&ObjectRef::new(node))
            .map(|node| node.labels().clone())
            .unwrap_or_default();

        self.of_type(NetworkType::Underlay)
            .into_iter()
            .find(|network| {
                let listed = network
                    .status
                    .as_ref()
                    .is_some_and(|status| status.node_list.iter().any(|n| n == node));
                let selected = !network.spec.node_selector.is_empty()
                    && network
                        .spec
                        .node_selector
                        .iter()
                        .all(|(key, value)| labels.get(key) == Some(value));
                listed || selected
            })
            .map(|network| network.name_any())
    }

    fn network_for_role(&self, role: NetworkType) -> Option<String> {
        if role == NetworkType::Underlay {
            return None;
        }
        self.of_type(role)
            .first()
            .map(|network| network.name_any())
    }
}
