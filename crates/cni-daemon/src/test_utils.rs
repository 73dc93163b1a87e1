//! Test utilities for the handshake
//!
//! In-memory cluster and NIC stand-ins plus builders for pods and bindings.

#[cfg(test)]
use crate::cluster::{BindingQuery, BindingStatus, ClusterApi};
#[cfg(test)]
use crate::config::Config;
#[cfg(test)]
use crate::error::DaemonError;
#[cfg(test)]
use crate::handler::Daemon;
#[cfg(test)]
use crate::nic::{NicConfigurator, NicRequest};
#[cfg(test)]
use crate::waiter::PollingWaiter;
#[cfg(test)]
use crds::constants::{LABEL_INTERFACE_NAME, LABEL_NODE, LABEL_POD_UID};
#[cfg(test)]
use crds::{Address, IPInstance, IPInstanceSpec, IPVersion, Network, NetworkSpec, NetworkType};
#[cfg(test)]
use k8s_openapi::api::core::v1::Pod;
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
#[cfg(test)]
use kube::ResourceExt;
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::path::PathBuf;
#[cfg(test)]
use std::sync::{Arc, Mutex};
#[cfg(test)]
use std::time::Duration;

/// Helper to create a pod `ns/name` with UID `u1`
#[cfg(test)]
pub fn create_test_pod(name: &str, annotations: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("ns".to_string()),
            uid: Some("u1".to_string()),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            ..Default::default()
        },
        spec: None,
        status: None,
    }
}

/// Helper to create a binding of pod `ns/p1` (UID `u1`) on `node-a`/`eth0`
#[cfg(test)]
pub fn create_test_instance(name: &str, ip: &str, network: &str, mac: &str) -> IPInstance {
    let version = if ip.contains(':') { IPVersion::V6 } else { IPVersion::V4 };
    let gateway = match version {
        IPVersion::V4 => "10.0.0.1",
        IPVersion::V6 => "fd00::1",
    };
    let mut instance = IPInstance::new(
        name,
        IPInstanceSpec {
            network: network.to_string(),
            subnet: format!("{network}-v{version}"),
            address: Address {
                ip: ip.to_string(),
                mac: mac.to_string(),
                gateway: Some(gateway.to_string()),
                version,
                net_id: None,
            },
        },
    );
    instance.metadata.namespace = Some("ns".to_string());
    instance.metadata.labels = Some(BTreeMap::from([
        (LABEL_NODE.to_string(), "node-a".to_string()),
        (LABEL_POD_UID.to_string(), "u1".to_string()),
        (LABEL_INTERFACE_NAME.to_string(), "eth0".to_string()),
    ]));
    instance
}

/// Helper to mark a binding as being deleted
#[cfg(test)]
pub fn as_deleting_instance(mut instance: IPInstance) -> IPInstance {
    instance.metadata.deletion_timestamp = Some(Time(Default::default()));
    instance
}

/// Helper to create an overlay network
#[cfg(test)]
pub fn create_test_network(name: &str) -> Network {
    Network::new(
        name,
        NetworkSpec {
            network_type: NetworkType::Overlay,
            net_id: None,
            node_selector: BTreeMap::new(),
            mode: None,
        },
    )
}

/// Query for the bindings of `ns/p1` on `node-a`/`eth0`
#[cfg(test)]
pub fn test_query() -> BindingQuery {
    BindingQuery {
        node: "node-a".to_string(),
        namespace: "ns".to_string(),
        pod_name: "p1".to_string(),
        pod_uid: "u1".to_string(),
        interface: "eth0".to_string(),
    }
}

/// In-memory cluster
///
/// Bindings stay hidden until `visible_after` list calls were made, to
/// model the controller writing them while the daemon polls.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockCluster {
    pods: Arc<Mutex<HashMap<String, Pod>>>,
    instances: Arc<Mutex<Vec<IPInstance>>>,
    networks: Arc<Mutex<HashMap<String, Network>>>,
    visible_after: Arc<Mutex<usize>>,
    list_calls: Arc<Mutex<usize>>,
    status_patches: Arc<Mutex<Vec<(String, BindingStatus)>>>,
    annotation_patches: Arc<Mutex<Vec<(String, BTreeMap<String, String>)>>>,
    fail_list: Arc<Mutex<bool>>,
    fail_status: Arc<Mutex<bool>>,
    fail_annotations: Arc<Mutex<bool>>,
}

#[cfg(test)]
impl MockCluster {
    pub fn add_pod(&self, pod: Pod) {
        let key = format!("{}/{}", pod.namespace().unwrap_or_default(), pod.name_any());
        self.pods.lock().unwrap().insert(key, pod);
    }

    pub fn add_instance(&self, instance: IPInstance) {
        self.instances.lock().unwrap().push(instance);
    }

    pub fn add_network(&self, network: Network) {
        self.networks.lock().unwrap().insert(network.name_any(), network);
    }

    pub fn set_visible_after(&self, calls: usize) {
        *self.visible_after.lock().unwrap() = calls;
    }

    pub fn set_list_failure(&self, fail: bool) {
        *self.fail_list.lock().unwrap() = fail;
    }

    pub fn set_status_failure(&self, fail: bool) {
        *self.fail_status.lock().unwrap() = fail;
    }

    pub fn set_annotation_failure(&self, fail: bool) {
        *self.fail_annotations.lock().unwrap() = fail;
    }

    pub fn list_calls(&self) -> usize {
        *self.list_calls.lock().unwrap()
    }

    /// `(namespace/name, status)` of every status write
    pub fn status_patches(&self) -> Vec<(String, BindingStatus)> {
        self.status_patches.lock().unwrap().clone()
    }

    /// `(namespace/name, annotations)` of every pod patch
    pub fn annotation_patches(&self) -> Vec<(String, BTreeMap<String, String>)> {
        self.annotation_patches.lock().unwrap().clone()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl ClusterApi for MockCluster {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, DaemonError> {
        let key = format!("{namespace}/{name}");
        self.pods
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or(DaemonError::PodLookup {
                pod: key,
                reason: "not found".to_string(),
            })
    }

    async fn list_bound_instances(&self, query: &BindingQuery) -> Result<Vec<IPInstance>, DaemonError> {
        let calls = {
            let mut calls = self.list_calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        if *self.fail_list.lock().unwrap() {
            return Err(DaemonError::ListInstances {
                pod: query.pod_key(),
                reason: "list refused".to_string(),
            });
        }
        if calls < *self.visible_after.lock().unwrap() {
            return Ok(Vec::new());
        }

        let matches = |instance: &IPInstance| {
            let labels = instance.labels();
            instance.namespace().as_deref() == Some(query.namespace.as_str())
                && labels.get(LABEL_NODE) == Some(&query.node)
                && labels.get(LABEL_POD_UID) == Some(&query.pod_uid)
                && labels.get(LABEL_INTERFACE_NAME) == Some(&query.interface)
        };
        Ok(self
            .instances
            .lock()
            .unwrap()
            .iter()
            .filter(|instance| matches(instance))
            .cloned()
            .collect())
    }

    async fn get_network(&self, name: &str) -> Result<Network, DaemonError> {
        self.networks
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DaemonError::NetworkLookup {
                network: name.to_string(),
                reason: "not found".to_string(),
            })
    }

    async fn patch_instance_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BindingStatus,
    ) -> Result<(), DaemonError> {
        if *self.fail_status.lock().unwrap() {
            return Err(DaemonError::StatusUpdate {
                instance: format!("{namespace}/{name}"),
                reason: "conflict retries exhausted".to_string(),
            });
        }
        self.status_patches
            .lock()
            .unwrap()
            .push((format!("{namespace}/{name}"), status.clone()));
        Ok(())
    }

    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), DaemonError> {
        if *self.fail_annotations.lock().unwrap() {
            return Err(DaemonError::PodPatch {
                pod: format!("{namespace}/{name}"),
                reason: "patch refused".to_string(),
            });
        }
        self.annotation_patches
            .lock()
            .unwrap()
            .push((format!("{namespace}/{name}"), annotations));
        Ok(())
    }
}

/// NIC configurator recording its calls
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockNic {
    configured: Arc<Mutex<Vec<NicRequest>>>,
    torn_down: Arc<Mutex<Vec<String>>>,
    fail: Arc<Mutex<bool>>,
}

#[cfg(test)]
impl MockNic {
    pub fn configured(&self) -> Vec<NicRequest> {
        self.configured.lock().unwrap().clone()
    }

    pub fn torn_down(&self) -> Vec<String> {
        self.torn_down.lock().unwrap().clone()
    }

    pub fn set_failure(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl NicConfigurator for MockNic {
    async fn configure(&self, request: &NicRequest) -> Result<String, DaemonError> {
        if *self.fail.lock().unwrap() {
            return Err(DaemonError::Nic("veth creation refused".to_string()));
        }
        self.configured.lock().unwrap().push(request.clone());
        Ok(format!("h_{}", request.pod_name))
    }

    async fn teardown(&self, net_ns: &str) -> Result<(), DaemonError> {
        if *self.fail.lock().unwrap() {
            return Err(DaemonError::Nic("netns busy".to_string()));
        }
        self.torn_down.lock().unwrap().push(net_ns.to_string());
        Ok(())
    }
}

/// Configuration for `node-a` with a fast, short poll
#[cfg(test)]
pub fn test_config() -> Config {
    Config {
        node_name: "node-a".to_string(),
        socket_path: PathBuf::from("/tmp/podnet-test.sock"),
        patch_calico_pod_ips: false,
        dual_stack: true,
        poll_base: Duration::from_millis(1),
        poll_retries: 3,
    }
}

/// Helper to create a daemon over mocks
#[cfg(test)]
pub fn create_test_daemon(config: Config, cluster: &MockCluster, nic: &MockNic) -> Arc<Daemon> {
    let waiter = PollingWaiter::new(config.poll_base, config.poll_retries);
    Arc::new(Daemon::new(
        config,
        Arc::new(cluster.clone()),
        Arc::new(waiter),
        Arc::new(nic.clone()),
    ))
}
