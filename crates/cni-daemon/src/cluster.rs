//! Cluster access of the node daemon.
//!
//! Every read goes straight to the API server. The handshake must not act
//! on a lagging cache: the controller may have written the bindings only
//! milliseconds earlier.

use crate::error::DaemonError;
use crds::constants::{LABEL_INTERFACE_NAME, LABEL_NODE, LABEL_POD_UID};
use crds::{IPInstance, Network};
use ipam::{ConflictBackoff, is_kube_conflict, retry_on_conflict};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use serde_json::{Value, json};
use std::collections::BTreeMap;

/// Bindings of one pod interface on one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingQuery {
    /// Node the daemon serves
    pub node: String,
    /// Pod namespace (IPInstances live next to their pod)
    pub namespace: String,
    /// Pod name, for messages
    pub pod_name: String,
    /// UID of the pod incarnation
    pub pod_uid: String,
    /// Pod interface
    pub interface: String,
}

impl BindingQuery {
    /// `namespace/name` of the pod.
    #[must_use]
    pub fn pod_key(&self) -> String {
        format!("{}/{}", self.namespace, self.pod_name)
    }

    /// Label selector matching the bindings.
    #[must_use]
    pub fn label_selector(&self) -> String {
        format!(
            "{LABEL_NODE}={},{LABEL_POD_UID}={},{LABEL_INTERFACE_NAME}={}",
            self.node, self.pod_uid, self.interface
        )
    }
}

/// Operational status written back once a sandbox uses a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingStatus {
    /// Sandbox container ID
    pub sandbox_id: String,
    /// Node the sandbox runs on
    pub node_name: String,
    /// Pod namespace
    pub pod_namespace: String,
    /// Pod name
    pub pod_name: String,
    /// Write time, RFC 3339
    pub update_timestamp: String,
}

impl BindingStatus {
    /// Merge patch for the status subresource. Clears the phase: a binding
    /// in use by a sandbox is neither pending nor reserved.
    #[must_use]
    pub fn to_patch(&self) -> Value {
        json!({
            "status": {
                "sandboxID": self.sandbox_id,
                "nodeName": self.node_name,
                "podNamespace": self.pod_namespace,
                "podName": self.pod_name,
                "phase": Value::Null,
                "updateTimestamp": self.update_timestamp,
            }
        })
    }
}

/// Reads and writes the daemon needs from the cluster.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Reads a pod from the API server.
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, DaemonError>;

    /// Lists the IPInstances matching `query`.
    async fn list_bound_instances(&self, query: &BindingQuery) -> Result<Vec<IPInstance>, DaemonError>;

    /// Reads a network.
    async fn get_network(&self, name: &str) -> Result<Network, DaemonError>;

    /// Merges `status` into an IPInstance, retrying on write conflicts.
    async fn patch_instance_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BindingStatus,
    ) -> Result<(), DaemonError>;

    /// Merges annotations into a pod.
    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), DaemonError>;
}

/// [`ClusterApi`] over a Kubernetes client.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl std::fmt::Debug for KubeClusterApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterApi").finish_non_exhaustive()
    }
}

impl KubeClusterApi {
    /// Creates an accessor over `client`.
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeClusterApi {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod, DaemonError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| DaemonError::PodLookup {
            pod: format!("{namespace}/{name}"),
            reason: e.to_string(),
        })
    }

    async fn list_bound_instances(&self, query: &BindingQuery) -> Result<Vec<IPInstance>, DaemonError> {
        let api: Api<IPInstance> = Api::namespaced(self.client.clone(), &query.namespace);
        let params = ListParams::default().labels(&query.label_selector());
        let list = api.list(&params).await.map_err(|e| DaemonError::ListInstances {
            pod: query.pod_key(),
            reason: e.to_string(),
        })?;
        Ok(list.items)
    }

    async fn get_network(&self, name: &str) -> Result<Network, DaemonError> {
        let api: Api<Network> = Api::all(self.client.clone());
        api.get(name).await.map_err(|e| DaemonError::NetworkLookup {
            network: name.to_string(),
            reason: e.to_string(),
        })
    }

    async fn patch_instance_status(
        &self,
        namespace: &str,
        name: &str,
        status: &BindingStatus,
    ) -> Result<(), DaemonError> {
        let api: Api<IPInstance> = Api::namespaced(self.client.clone(), namespace);
        let api = &api;
        let patch = status.to_patch();
        let patch = &patch;

        retry_on_conflict(ConflictBackoff::default(), is_kube_conflict, move || async move {
            api.patch_status(name, &PatchParams::default(), &Patch::Merge(patch))
                .await
                .map(|_| ())
        })
        .await
        .map_err(|e| DaemonError::StatusUpdate {
            instance: format!("{namespace}/{name}"),
            reason: e.to_string(),
        })
    }

    async fn patch_pod_annotations(
        &self,
        namespace: &str,
        name: &str,
        annotations: BTreeMap<String, String>,
    ) -> Result<(), DaemonError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "metadata": { "annotations": annotations } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| DaemonError::PodPatch {
                pod: format!("{namespace}/{name}"),
                reason: e.to_string(),
            })
    }
}
