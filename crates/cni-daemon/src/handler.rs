//! Node binding handshake.
//!
//! Add path, in order:
//! 1. read the pod from the API server
//! 2. derive how many addresses its IP family calls for
//! 3. wait until exactly that many bindings are visible
//! 4. validate them: one MAC, one network, one address per family
//! 5. configure the interface through the network's mode
//! 6. write the sandbox back into every binding's status
//!
//! Deleting only tears the interface down. Bindings are released by the
//! controller, never here.

use crate::cluster::{BindingQuery, BindingStatus, ClusterApi};
use crate::config::Config;
use crate::error::DaemonError;
use crate::nic::{NicAddress, NicConfigurator, NicRequest};
use crate::request::{IPAddress, PodIPAMRequest, PodIPAMResponse, PodRequest, PodResponse};
use crate::waiter::BindingWaiter;
use chrono::{SecondsFormat, Utc};
use crds::constants::{ANNOTATION_CALICO_POD_IPS, ANNOTATION_IP_FAMILY, DEFAULT_INTERFACE_NAME};
use crds::{IPInstance, IPVersion};
use ipam::pod::pod_key;
use ipam::{IpFamilyMode, PodNetworkIntent};
use ipnet::IpNet;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bindings that passed validation.
#[derive(Debug)]
struct ValidatedBindings {
    mac: String,
    network: String,
    addresses: Vec<IPAddress>,
    nic_addresses: Vec<NicAddress>,
}

/// Serves handshake requests for one node.
pub struct Daemon {
    config: Config,
    cluster: Arc<dyn ClusterApi>,
    waiter: Arc<dyn BindingWaiter>,
    nic: Arc<dyn NicConfigurator>,
}

impl std::fmt::Debug for Daemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Daemon").field("config", &self.config).finish_non_exhaustive()
    }
}

impl Daemon {
    /// Creates a daemon over its collaborators.
    pub fn new(
        config: Config,
        cluster: Arc<dyn ClusterApi>,
        waiter: Arc<dyn BindingWaiter>,
        nic: Arc<dyn NicConfigurator>,
    ) -> Self {
        Self {
            config,
            cluster,
            waiter,
            nic,
        }
    }

    /// Waits for the pod's bindings and wires them into the sandbox.
    pub async fn add(&self, request: &PodRequest) -> Result<PodResponse, DaemonError> {
        debug!("handle add request: {:?}", request);
        let pod = self.cluster.get_pod(&request.pod_namespace, &request.pod_name).await?;
        let key = pod_key(&pod);

        let instances = self.converge(&pod, DEFAULT_INTERFACE_NAME).await?;
        self.patch_calico_pod_ips(&pod, &instances).await;

        let bindings = validate(&key, &instances)?;
        let network = self.cluster.get_network(&bindings.network).await?;

        info!(pod = %key, mac = %bindings.mac, "Create container with {}", joined_ips(&bindings.addresses));
        let host_interface = self
            .nic
            .configure(&NicRequest {
                pod_name: request.pod_name.clone(),
                pod_namespace: request.pod_namespace.clone(),
                net_ns: request.net_ns.clone(),
                mac: bindings.mac.clone(),
                addresses: bindings.nic_addresses,
                mode: network.mode(),
            })
            .await?;
        info!(pod = %key, host_interface = %host_interface, "Container network created");

        self.write_status(&instances, &request.container_id, &request.pod_namespace, &request.pod_name)
            .await?;

        Ok(PodResponse {
            address: bindings.addresses,
            host_interface,
            error: String::new(),
        })
    }

    /// Tears down the sandbox interface.
    pub async fn del(&self, request: &PodRequest) -> Result<(), DaemonError> {
        info!("Delete container {}/{}", request.pod_namespace, request.pod_name);
        self.nic.teardown(&request.net_ns).await?;
        info!("Container {}/{} deleted", request.pod_namespace, request.pod_name);
        Ok(())
    }

    /// Address-only form: waits for the bindings of one interface and
    /// reports them without touching the data plane.
    pub async fn ipam_add(&self, request: &PodIPAMRequest) -> Result<PodIPAMResponse, DaemonError> {
        debug!("handle ipam add request: {:?}", request);
        let pod = self.cluster.get_pod(&request.pod_namespace, &request.pod_name).await?;

        let instances = self.converge(&pod, &request.interface_name).await?;
        let addresses: Vec<IPAddress> = instances.iter().map(wire_address).collect();
        info!(
            pod = %pod_key(&pod),
            interface = %request.interface_name,
            "Get allocated IP {}",
            joined_ips(&addresses)
        );

        self.write_status(&instances, &request.container_id, &request.pod_namespace, &request.pod_name)
            .await?;

        Ok(PodIPAMResponse {
            addresses,
            error: String::new(),
        })
    }

    /// Number of addresses the pod's IP family calls for.
    ///
    /// A family finalized by the admission layer is read as-is; otherwise
    /// it is resolved the way the controller resolves it.
    fn expected_count(&self, pod: &Pod) -> Result<usize, DaemonError> {
        let intent = PodNetworkIntent::from_pod(pod);
        let family = if intent.handled_by_webhook {
            let raw = pod.annotations().get(ANNOTATION_IP_FAMILY).cloned().unwrap_or_default();
            IpFamilyMode::parse(&raw).ok_or_else(|| DaemonError::InvalidFamily {
                pod: pod_key(pod),
                reason: format!("{raw:?}"),
            })?
        } else {
            intent
                .family(self.config.dual_stack)
                .map_err(|e| DaemonError::InvalidFamily {
                    pod: pod_key(pod),
                    reason: e.to_string(),
                })?
        };
        Ok(family.expected_count())
    }

    async fn converge(&self, pod: &Pod, interface: &str) -> Result<Vec<IPInstance>, DaemonError> {
        let expected = self.expected_count(pod)?;
        let query = BindingQuery {
            node: self.config.node_name.clone(),
            namespace: pod.namespace().unwrap_or_default(),
            pod_name: pod.name_any(),
            pod_uid: pod.uid().unwrap_or_default(),
            interface: interface.to_string(),
        };
        self.waiter
            .wait_for_bindings(self.cluster.as_ref(), &query, expected)
            .await
    }

    async fn write_status(
        &self,
        instances: &[IPInstance],
        container_id: &str,
        pod_namespace: &str,
        pod_name: &str,
    ) -> Result<(), DaemonError> {
        let status = BindingStatus {
            sandbox_id: container_id.to_string(),
            node_name: self.config.node_name.clone(),
            pod_namespace: pod_namespace.to_string(),
            pod_name: pod_name.to_string(),
            update_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        };
        for instance in instances {
            self.cluster
                .patch_instance_status(&instance.namespace().unwrap_or_default(), &instance.name_any(), &status)
                .await?;
        }
        Ok(())
    }

    /// Best effort: a failure is logged and the handshake goes on.
    async fn patch_calico_pod_ips(&self, pod: &Pod, instances: &[IPInstance]) {
        if !self.config.patch_calico_pod_ips {
            return;
        }
        let ips: Vec<String> = instances
            .iter()
            .map(|instance| {
                instance
                    .spec
                    .address
                    .ip
                    .parse::<IpNet>()
                    .map_or_else(|_| instance.spec.address.ip.clone(), |net| net.addr().to_string())
            })
            .collect();
        let annotations = BTreeMap::from([(ANNOTATION_CALICO_POD_IPS.to_string(), ips.join(","))]);

        if let Err(e) = self
            .cluster
            .patch_pod_annotations(&pod.namespace().unwrap_or_default(), &pod.name_any(), annotations)
            .await
        {
            warn!("Failed to patch {} on pod {}: {}", ANNOTATION_CALICO_POD_IPS, pod_key(pod), e);
        }
    }
}

fn wire_address(instance: &IPInstance) -> IPAddress {
    let address = &instance.spec.address;
    IPAddress {
        ip: address.ip.clone(),
        mac: address.mac.clone(),
        gateway: address.gateway.clone().unwrap_or_default(),
        protocol: address.version,
    }
}

fn joined_ips(addresses: &[IPAddress]) -> String {
    addresses
        .iter()
        .map(|a| a.ip.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// Checks the bindings of one pod describe a single interface.
///
/// Any contradiction means the cluster state is corrupt; nothing is merged.
fn validate(pod: &str, instances: &[IPInstance]) -> Result<ValidatedBindings, DaemonError> {
    let inconsistent = |reason: String| DaemonError::Inconsistent {
        pod: pod.to_string(),
        reason,
    };

    let mut mac: Option<&str> = None;
    let mut network: Option<&str> = None;
    let mut seen: BTreeSet<IPVersion> = BTreeSet::new();
    let mut pairs: Vec<(IPAddress, NicAddress)> = Vec::new();

    for instance in instances {
        let address = &instance.spec.address;

        match mac {
            None => mac = Some(address.mac.as_str()),
            Some(first) if first != address.mac => {
                return Err(inconsistent("mac for all ip instances should be the same".to_string()));
            }
            Some(_) => {}
        }

        match network {
            None => network = Some(instance.spec.network.as_str()),
            Some(first) if first != instance.spec.network => {
                return Err(inconsistent(format!(
                    "found different networks {}/{}",
                    instance.spec.network, first
                )));
            }
            Some(_) => {}
        }

        let net: IpNet = address
            .ip
            .parse()
            .map_err(|_| inconsistent(format!("failed to parse ip address {} to cidr", address.ip)))?;
        if IPVersion::of(&net.addr()) != address.version {
            return Err(inconsistent(format!("{} is not an IPv{} address", address.ip, address.version)));
        }
        if !seen.insert(address.version) {
            return Err(inconsistent(format!("only one ipv{} address for each pod is supported", address.version)));
        }

        let gateway = address
            .gateway
            .as_deref()
            .filter(|gw| !gw.is_empty())
            .map(|gw| gw.parse().map_err(|_| inconsistent(format!("invalid gateway {gw}"))))
            .transpose()?;

        pairs.push((
            wire_address(instance),
            NicAddress {
                address: net,
                gateway,
                net_id: address.net_id,
            },
        ));
    }

    let (Some(mac), Some(network)) = (mac, network) else {
        return Err(inconsistent("no available ip".to_string()));
    };

    // IPv4 first, the order the plugin configures them in
    pairs.sort_by_key(|(wire, _)| wire.protocol);
    let (addresses, nic_addresses) = pairs.into_iter().unzip();

    Ok(ValidatedBindings {
        mac: mac.to_string(),
        network: network.to_string(),
        addresses,
        nic_addresses,
    })
}
