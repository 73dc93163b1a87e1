//! Pod interface configuration seam.
//!
//! Building veth pairs, VLAN sub-interfaces or VXLAN devices is data-plane
//! work outside this crate. The handshake hands over a validated
//! [`NicRequest`] and gets back the host-side interface name.

use crate::error::DaemonError;
use crds::NetworkMode;
use ipnet::IpNet;
use std::net::IpAddr;
use tracing::info;
use uuid::Uuid;

/// Host-side interface name prefix
const HOST_INTERFACE_PREFIX: &str = "h_";
/// Hash characters kept; prefix + hash stays within IFNAMSIZ
const HOST_INTERFACE_HASH_LEN: usize = 11;

/// One address to configure inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicAddress {
    /// Address with prefix length
    pub address: IpNet,
    /// Default gateway of the family
    pub gateway: Option<IpAddr>,
    /// VLAN ID / VNI
    pub net_id: Option<i32>,
}

/// Everything needed to wire a pod interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicRequest {
    /// Pod name
    pub pod_name: String,
    /// Pod namespace
    pub pod_namespace: String,
    /// Sandbox network namespace path
    pub net_ns: String,
    /// Hardware address of the pod interface
    pub mac: String,
    /// Addresses, IPv4 first
    pub addresses: Vec<NicAddress>,
    /// Data-plane mode of the network
    pub mode: NetworkMode,
}

/// Creates and removes pod interfaces.
#[async_trait::async_trait]
pub trait NicConfigurator: Send + Sync {
    /// Wires the pod interface and returns the host-side interface name.
    async fn configure(&self, request: &NicRequest) -> Result<String, DaemonError>;

    /// Removes the pod interface. Tearing down a missing namespace succeeds.
    async fn teardown(&self, net_ns: &str) -> Result<(), DaemonError>;
}

/// Host-side interface name of a pod, stable across sandbox restarts.
#[must_use]
pub fn host_interface_name(pod_name: &str, pod_namespace: &str) -> String {
    let hash = Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{pod_namespace}.{pod_name}").as_bytes())
        .simple()
        .to_string();
    format!("{HOST_INTERFACE_PREFIX}{}", &hash[..HOST_INTERFACE_HASH_LEN])
}

/// Configurator that only logs what it would do.
///
/// Used where the data plane is managed by another agent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunNic;

#[async_trait::async_trait]
impl NicConfigurator for DryRunNic {
    async fn configure(&self, request: &NicRequest) -> Result<String, DaemonError> {
        let host_interface = host_interface_name(&request.pod_name, &request.pod_namespace);
        let addresses: Vec<String> = request.addresses.iter().map(|a| a.address.to_string()).collect();
        info!(
            pod = %format!("{}/{}", request.pod_namespace, request.pod_name),
            netns = %request.net_ns,
            mac = %request.mac,
            mode = %request.mode,
            "Would configure {} with {:?}",
            host_interface,
            addresses
        );
        Ok(host_interface)
    }

    async fn teardown(&self, net_ns: &str) -> Result<(), DaemonError> {
        info!(netns = %net_ns, "Would tear down pod interface");
        Ok(())
    }
}
