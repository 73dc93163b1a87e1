//! Pod reads and finalizer writes.

use crate::error::ControllerError;
use ipam::{ConflictBackoff, is_kube_conflict, retry_on_conflict};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use serde_json::json;
use tracing::debug;

/// Direct (uncached) access to pods.
#[async_trait::async_trait]
pub trait PodClient: Send + Sync {
    /// Reads a pod from the API server. A missing pod is `None`.
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError>;

    /// Adds `finalizer` unless present. Retries on write conflicts.
    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<(), ControllerError>;

    /// Removes `finalizer` if present. Retries on write conflicts.
    async fn remove_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<(), ControllerError>;
}

/// [`PodClient`] over the Kubernetes API.
pub struct KubePodClient {
    client: Client,
}

impl KubePodClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Rewrites the finalizer list guarded by the pod's resourceVersion, so a
    /// concurrent writer turns into a 409 instead of a lost update.
    async fn update_finalizers(
        &self,
        namespace: &str,
        name: &str,
        edit: impl Fn(&mut Vec<String>) -> bool + Send + Sync,
    ) -> Result<(), ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let api = &api;
        let edit = &edit;

        let result = retry_on_conflict(ConflictBackoff::default(), is_kube_conflict, move || async move {
            let Some(pod) = api.get_opt(name).await? else {
                return Ok(());
            };
            let mut finalizers = pod.metadata.finalizers.clone().unwrap_or_default();
            if !edit(&mut finalizers) {
                return Ok(());
            }
            let patch = json!({
                "metadata": {
                    "finalizers": finalizers,
                    "resourceVersion": pod.metadata.resource_version,
                }
            });
            api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
                .await
                .map(|_| ())
        })
        .await;

        result.map_err(|e| {
            if is_kube_conflict(&e) {
                ControllerError::ConflictRetriesExhausted(format!("finalizers of pod {namespace}/{name}"))
            } else {
                ControllerError::Kube(e)
            }
        })
    }
}

#[async_trait::async_trait]
impl PodClient for KubePodClient {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<Pod>, ControllerError> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn add_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<(), ControllerError> {
        self.update_finalizers(namespace, name, |finalizers| {
            if finalizers.iter().any(|f| f == finalizer) {
                return false;
            }
            finalizers.push(finalizer.to_string());
            true
        })
        .await?;
        debug!("Ensured finalizer {} on pod {}/{}", finalizer, namespace, name);
        Ok(())
    }

    async fn remove_finalizer(&self, namespace: &str, name: &str, finalizer: &str) -> Result<(), ControllerError> {
        self.update_finalizers(namespace, name, |finalizers| {
            let before = finalizers.len();
            finalizers.retain(|f| f != finalizer);
            finalizers.len() != before
        })
        .await?;
        debug!("Removed finalizer {} from pod {}/{}", finalizer, namespace, name);
        Ok(())
    }
}
