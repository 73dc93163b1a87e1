//! Allocation reconciliation for pods.
//!
//! One pod event is handled at a time, level-triggered. On entry, in order:
//! 1. deleting: stateful pods reserve their addresses and drop the finalizer
//! 2. evicted or completed: decouple
//! 3. already carrying the address annotation: nothing to do
//! 4. otherwise: select a network, then allocate (stateless) or run the
//!    stateful path (`stateful.rs`)

mod allocate;
mod lifecycle;
mod stateful;

use crate::error::ControllerError;
use crate::events::{EventSink, REASON_ALLOCATION_FAIL, Severity};
use crate::metrics::Metrics;
use crate::pod_client::PodClient;
use crate::selector::{NetworkIndex, select_network};
use crds::constants::ANNOTATION_IP;
use ipam::pod::{is_completed, is_deleting, is_evicted, is_host_network, is_stateful, node_name, pod_key};
use ipam::{IpamManager, IpamStore, PodNetworkIntent};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use tracing::{debug, info};

/// Cluster-wide reconcile settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Retention default for stateful pods without an override
    pub default_ip_retain: bool,
    /// Honour IP family hints and split subnet/pool entries per family
    pub dual_stack: bool,
}

/// Reconciles pod address allocation.
pub struct Reconciler {
    pub(crate) pods: Arc<dyn PodClient>,
    pub(crate) networks: Arc<dyn NetworkIndex>,
    pub(crate) manager: Arc<dyn IpamManager>,
    pub(crate) store: Arc<dyn IpamStore>,
    pub(crate) events: Arc<dyn EventSink>,
    pub(crate) metrics: Arc<Metrics>,
    pub(crate) settings: Settings,
}

/// Event filter: which pods are worth a reconcile at all.
///
/// Deleting pods only matter when stateful. Live pods must be scheduled and
/// not yet annotated, except evicted/completed ones which still need their
/// addresses decoupled.
pub fn should_process(pod: &Pod) -> bool {
    if is_host_network(pod) {
        return false;
    }
    if is_deleting(pod) {
        return is_stateful(pod);
    }
    if is_evicted(pod) || is_completed(pod) {
        return true;
    }
    node_name(pod).is_some() && !pod.annotations().contains_key(ANNOTATION_IP)
}

impl Reconciler {
    /// Reconciles one pod event.
    ///
    /// The pod is re-read from the API server first; the cached copy that
    /// triggered the event may be stale.
    pub async fn reconcile_pod(&self, pod: &Pod) -> Result<Action, ControllerError> {
        let name = pod.name_any();
        let namespace = pod.namespace().unwrap_or_default();
        info!("Reconciling Pod {}/{}", namespace, name);

        let Some(pod) = self.pods.get(&namespace, &name).await? else {
            debug!("Pod {}/{} is gone", namespace, name);
            return Ok(Action::await_change());
        };

        if !should_process(&pod) {
            debug!("Skipping pod {}/{}", namespace, name);
            return Ok(Action::await_change());
        }

        match self.handle(&pod).await {
            Ok(()) => Ok(Action::await_change()),
            Err(e) => {
                self.events
                    .publish(&pod, Severity::Warning, REASON_ALLOCATION_FAIL, e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    async fn handle(&self, pod: &Pod) -> Result<(), ControllerError> {
        if is_deleting(pod) {
            if is_stateful(pod) {
                self.reserve(pod).await?;
            }
            return Ok(());
        }

        if is_evicted(pod) || is_completed(pod) {
            return self.decouple(pod).await;
        }

        let intent = PodNetworkIntent::from_pod(pod);
        if intent.assigned {
            debug!("Pod {} already has an address", pod_key(pod));
            return Ok(());
        }

        let network = select_network(&intent, pod, self.networks.as_ref())?;
        debug!(pod = %pod_key(pod), network = %network, "Selected network");

        if is_stateful(pod) {
            self.stateful_allocate(pod, &intent, &network).await
        } else {
            self.allocate(pod, &intent, &network).await
        }
    }
}
