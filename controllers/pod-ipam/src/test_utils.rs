//! Test utilities for unit testing the reconciler
//!
//! Builders for pods plus in-memory stand-ins for the pod client, the
//! network index and the event sink.

#[cfg(test)]
use crate::error::ControllerError;
#[cfg(test)]
use crate::events::{EventSink, Severity};
#[cfg(test)]
use crate::metrics::Metrics;
#[cfg(test)]
use crate::pod_client::PodClient;
#[cfg(test)]
use crate::reconciler::{Reconciler, Settings};
#[cfg(test)]
use crate::selector::NetworkIndex;
#[cfg(test)]
use crds::NetworkType;
#[cfg(test)]
use ipam::{IpamManager, MockIpamManager, MockIpamStore};
#[cfg(test)]
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
#[cfg(test)]
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference, Time};
#[cfg(test)]
use std::collections::{BTreeMap, HashMap};
#[cfg(test)]
use std::sync::{Arc, Mutex};

/// Helper to create a scheduled test pod
#[cfg(test)]
pub fn create_test_pod(name: &str, namespace: &str, uid: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-a".to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Pending".to_string()),
            ..Default::default()
        }),
    }
}

/// Helper to add annotations to a test pod
#[cfg(test)]
pub fn with_annotations(mut pod: Pod, annotations: &[(&str, &str)]) -> Pod {
    let map = pod.metadata.annotations.get_or_insert_with(BTreeMap::new);
    for (key, value) in annotations {
        map.insert(key.to_string(), value.to_string());
    }
    pod
}

/// Helper to mark a test pod as a StatefulSet replica
#[cfg(test)]
pub fn as_stateful(mut pod: Pod) -> Pod {
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "StatefulSet".to_string(),
        name: "web".to_string(),
        uid: "sts-uid".to_string(),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

/// Helper to mark a test pod as terminating
#[cfg(test)]
pub fn as_deleting(mut pod: Pod, finalizers: &[&str]) -> Pod {
    pod.metadata.deletion_timestamp = Some(Time(Default::default()));
    pod.metadata.finalizers = Some(finalizers.iter().map(ToString::to_string).collect());
    pod
}

/// Helper to set a terminal phase on a test pod
#[cfg(test)]
pub fn with_phase(mut pod: Pod, phase: &str, reason: Option<&str>) -> Pod {
    pod.status = Some(PodStatus {
        phase: Some(phase.to_string()),
        reason: reason.map(ToString::to_string),
        ..Default::default()
    });
    pod
}

/// Network index with fixed answers
#[cfg(test)]
#[derive(Default)]
pub struct StaticNetworkIndex {
    by_node: HashMap<String, String>,
    by_role: HashMap<NetworkType, String>,
}

#[cfg(test)]
impl StaticNetworkIndex {
    pub fn with_node(mut self, node: &str, network: &str) -> Self {
        self.by_node.insert(node.to_string(), network.to_string());
        self
    }

    pub fn with_role(mut self, role: NetworkType, network: &str) -> Self {
        self.by_role.insert(role, network.to_string());
        self
    }
}

#[cfg(test)]
impl NetworkIndex for StaticNetworkIndex {
    fn network_for_node(&self, node: &str) -> Option<String> {
        self.by_node.get(node).cloned()
    }

    fn network_for_role(&self, role: NetworkType) -> Option<String> {
        self.by_role.get(&role).cloned()
    }
}

/// In-memory pod client
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockPodClient {
    pods: Arc<Mutex<HashMap<String, Pod>>>,
    fail_finalizer: Arc<Mutex<bool>>,
}

#[cfg(test)]
impl MockPodClient {
    pub fn add_pod(&self, pod: Pod) {
        let key = ipam::pod::pod_key(&pod);
        self.pods.lock().unwrap().insert(key, pod);
    }

    /// Makes `add_finalizer` fail as if every conflict retry was spent
    pub fn set_finalizer_failure(&self, fail: bool) {
        *self.fail_finalizer.lock().unwrap() = fail;
    }

    pub fn finalizers(&self, namespace: &str, name: &str) -> Vec<String> {
        self.pods
            .lock()
            .unwrap()
            .get(&format!("{namespace}/{name}"))
            .and_then(|pod| pod.metadata.finalizers.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl PodClient for MockPodClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError> {
        Ok(self.pods.lock().unwrap().get(&format!("{namespace}/{name}")).cloned())
    }

    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<(), ControllerError> {
        if *self.fail_finalizer.lock().unwrap() {
            return Err(ControllerError::ConflictRetriesExhausted(format!("{namespace}/{name}")));
        }
        if let Some(pod) = self.pods.lock().unwrap().get_mut(&format!("{namespace}/{name}")) {
            let finalizers = pod.metadata.finalizers.get_or_insert_with(Vec::new);
            if !finalizers.iter().any(|f| f == finalizer) {
                finalizers.push(finalizer.to_string());
            }
        }
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<(), ControllerError> {
        if let Some(pod) = self.pods.lock().unwrap().get_mut(&format!("{namespace}/{name}")) {
            if let Some(finalizers) = pod.metadata.finalizers.as_mut() {
                finalizers.retain(|f| f != finalizer);
            }
        }
        Ok(())
    }
}

/// Event sink recording `(severity, reason, message)`
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockEventSink {
    events: Arc<Mutex<Vec<(Severity, String, String)>>>,
}

#[cfg(test)]
impl MockEventSink {
    pub fn events(&self) -> Vec<(Severity, String, String)> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, reason, _)| reason).collect()
    }
}

#[cfg(test)]
#[async_trait::async_trait]
impl EventSink for MockEventSink {
    async fn publish(&self, _pod: &Pod, severity: Severity, reason: &str, message: String) {
        self.events
            .lock()
            .unwrap()
            .push((severity, reason.to_string(), message));
    }
}

/// Everything a reconciler test needs to set up and inspect
#[cfg(test)]
pub struct TestHarness {
    pub reconciler: Reconciler,
    pub pods: MockPodClient,
    pub manager: MockIpamManager,
    pub store: MockIpamStore,
    pub events: MockEventSink,
    pub metrics: Arc<Metrics>,
}

/// Helper to create a reconciler over mocks
///
/// The engine knows `v4` (10.0.0.0/24) and `v6` (fd00::/120) in network `ov1`,
/// which is also the overlay network and the underlay network of `node-a`.
#[cfg(test)]
pub fn create_test_harness(settings: Settings) -> TestHarness {
    let manager = MockIpamManager::new();
    manager.add_subnet("ov1", "v4", "10.0.0.0/24");
    manager.add_subnet("ov1", "v6", "fd00::/120");

    let engine: Arc<dyn IpamManager> = Arc::new(manager.clone());
    let store = MockIpamStore::with_engine(engine.clone());
    let pods = MockPodClient::default();
    let events = MockEventSink::default();
    let metrics = Arc::new(Metrics::new().unwrap());
    let networks = StaticNetworkIndex::default()
        .with_role(NetworkType::Overlay, "ov1")
        .with_node("node-a", "ov1");

    let reconciler = Reconciler {
        pods: Arc::new(pods.clone()),
        networks: Arc::new(networks),
        manager: engine,
        store: Arc::new(store.clone()),
        events: Arc::new(events.clone()),
        metrics: metrics.clone(),
        settings,
    };

    TestHarness {
        reconciler,
        pods,
        manager,
        store,
        events,
        metrics,
    }
}
