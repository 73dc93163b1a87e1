//! Stateful (ordinal identity) allocation.
//!
//! The finalizer goes on first so the reservation path always runs on
//! deletion. Then one of:
//! - pre-assignment pool: force-assign the entry of this ordinal
//! - reallocation: recycle previous addresses, then allocate fresh
//! - reuse (default): force-assign previous addresses, or allocate fresh on
//!   first creation

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::{REASON_RELEASE_SUCCEED, Severity};
use crate::metrics::AllocationKind;
use crds::constants::FINALIZER_IP_ALLOCATED;
use ipam::pod::{ordinal_index, pod_key};
use ipam::{AllocatedIP, PodNetworkIntent, Retention, squash_ips, squash_subnets};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::time::Instant;
use tracing::{debug, info};

/// Sub-path a stateful pod takes once its finalizer is in place.
enum StatefulPlan {
    PreAssign,
    Reallocate,
    Reuse(Vec<AllocatedIP>),
    FirstCreation,
}

impl Reconciler {
    /// Runs the stateful path.
    ///
    /// Observed as a `stateful` allocation from the finalizer write onwards,
    /// failures included. First creation is the exception: it is a plain
    /// fresh allocation and observed as `normal`.
    pub(super) async fn stateful_allocate(
        &self,
        pod: &Pod,
        intent: &PodNetworkIntent,
        network: &str,
    ) -> Result<(), ControllerError> {
        let start = Instant::now();
        let result = match self.plan(pod, intent).await {
            Ok(StatefulPlan::FirstCreation) => {
                debug!("First creation of stateful pod {}", pod_key(pod));
                return self.allocate(pod, intent, network).await;
            }
            Ok(StatefulPlan::PreAssign) => self.pre_assign(pod, intent, network).await,
            Ok(StatefulPlan::Reallocate) => self.reallocate(pod, intent, network).await,
            Ok(StatefulPlan::Reuse(previous)) => self.reuse(pod, intent, previous).await,
            Err(e) => Err(e),
        };
        self.metrics
            .observe_allocation(AllocationKind::Stateful, result.is_ok(), start.elapsed());
        result
    }

    async fn plan(&self, pod: &Pod, intent: &PodNetworkIntent) -> Result<StatefulPlan, ControllerError> {
        self.pods
            .add_finalizer(&pod.namespace().unwrap_or_default(), &pod.name_any(), FINALIZER_IP_ALLOCATED)
            .await?;

        if intent.has_ip_pool() {
            return Ok(StatefulPlan::PreAssign);
        }
        match intent.retention(self.settings.default_ip_retain) {
            Retention::Reallocate => Ok(StatefulPlan::Reallocate),
            Retention::Retain => {
                let previous = self
                    .store
                    .allocated_ips(pod)
                    .await
                    .map_err(|e| ControllerError::ipam("list allocated ips", pod_key(pod), e))?;
                if previous.is_empty() {
                    Ok(StatefulPlan::FirstCreation)
                } else {
                    Ok(StatefulPlan::Reuse(previous))
                }
            }
        }
    }

    /// Force-assigns the pool entry of this pod's ordinal.
    async fn pre_assign(
        &self,
        pod: &Pod,
        intent: &PodNetworkIntent,
        network: &str,
    ) -> Result<(), ControllerError> {
        let key = pod_key(pod);
        let name = pod.name_any();
        let dual_stack = self.settings.dual_stack;

        let ordinal = ordinal_index(&name).ok_or_else(|| ControllerError::Selection {
            pod: key.clone(),
            reason: format!("pod name {name} has no ordinal suffix for the ip pool"),
        })?;
        let family = intent
            .family(dual_stack)
            .map_err(|e| ControllerError::ipam("resolve ip family", &key, e))?;
        let candidates = intent
            .pool_candidates(ordinal, dual_stack)
            .map_err(|e| ControllerError::ipam("pick ip pool entry", &key, e))?;

        let assignment = self
            .manager
            .assign(
                family,
                network,
                &intent.subnet_names(dual_stack),
                &candidates,
                &name,
                &pod.namespace().unwrap_or_default(),
                true,
            )
            .await
            .map_err(|e| ControllerError::ipam("assign", &key, e))?;

        self.re_couple(pod, &assignment).await
    }

    /// Force-assigns the addresses the pod's identity held before.
    async fn reuse(
        &self,
        pod: &Pod,
        intent: &PodNetworkIntent,
        previous: Vec<AllocatedIP>,
    ) -> Result<(), ControllerError> {
        let key = pod_key(pod);
        let family = intent
            .family(self.settings.dual_stack)
            .map_err(|e| ControllerError::ipam("resolve ip family", &key, e))?;
        let network = previous
            .first()
            .map(|ip| ip.network.clone())
            .unwrap_or_default();
        info!("Reusing {:?} for stateful pod {}", squash_ips(&previous), key);

        let assignment = self
            .manager
            .assign(
                family,
                &network,
                &squash_subnets(&previous),
                &squash_ips(&previous),
                &pod.name_any(),
                &pod.namespace().unwrap_or_default(),
                true,
            )
            .await
            .map_err(|e| ControllerError::ipam("assign", &key, e))?;

        self.re_couple(pod, &assignment).await
    }

    /// Recycles the previous addresses, then allocates fresh ones.
    async fn reallocate(
        &self,
        pod: &Pod,
        intent: &PodNetworkIntent,
        network: &str,
    ) -> Result<(), ControllerError> {
        self.recycle_previous(pod).await?;
        self.allocate(pod, intent, network).await
    }

    /// Releases every address the pod's identity still holds. Any failure
    /// aborts before a fresh allocation.
    async fn recycle_previous(&self, pod: &Pod) -> Result<(), ControllerError> {
        let key = pod_key(pod);
        let namespace = pod.namespace().unwrap_or_default();
        let previous = self
            .store
            .allocated_ips(pod)
            .await
            .map_err(|e| ControllerError::ipam("list allocated ips", &key, e))?;
        if previous.is_empty() {
            return Ok(());
        }

        for ip in &previous {
            self.store
                .ip_recycle(&namespace, ip)
                .await
                .map_err(|e| ControllerError::ipam("recycle", &key, e))?;
        }

        let addresses = squash_ips(&previous).join(",");
        info!("Recycled {} of stateful pod {}", addresses, key);
        self.events
            .publish(pod, Severity::Normal, REASON_RELEASE_SUCCEED, format!("IP(s) {addresses} released"))
            .await;
        Ok(())
    }
}
