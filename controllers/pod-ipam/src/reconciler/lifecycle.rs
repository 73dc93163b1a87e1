//! Terminal lifecycle transitions: reservation and decoupling.

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::{REASON_RELEASE_SUCCEED, REASON_RESERVE_SUCCEED, Severity};
use crds::constants::FINALIZER_IP_ALLOCATED;
use ipam::pod::pod_key;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::info;

impl Reconciler {
    /// Keeps a terminating stateful pod's addresses for its next incarnation,
    /// then lets the deletion proceed.
    pub(super) async fn reserve(&self, pod: &Pod) -> Result<(), ControllerError> {
        let key = pod_key(pod);
        self.store
            .ip_reserve(pod)
            .await
            .map_err(|e| ControllerError::ipam("reserve", &key, e))?;

        self.pods
            .remove_finalizer(&pod.namespace().unwrap_or_default(), &pod.name_any(), FINALIZER_IP_ALLOCATED)
            .await?;

        info!("Reserved addresses of terminating pod {}", key);
        self.events
            .publish(pod, Severity::Normal, REASON_RESERVE_SUCCEED, "IPs reserved for the next incarnation".to_string())
            .await;
        Ok(())
    }

    /// Unbinds every address of an evicted or completed pod.
    pub(super) async fn decouple(&self, pod: &Pod) -> Result<(), ControllerError> {
        let key = pod_key(pod);
        self.store
            .de_couple(pod)
            .await
            .map_err(|e| ControllerError::ipam("decouple", &key, e))?;

        info!("Decoupled addresses of finished pod {}", key);
        self.events
            .publish(pod, Severity::Normal, REASON_RELEASE_SUCCEED, "IPs released".to_string())
            .await;
        Ok(())
    }
}
