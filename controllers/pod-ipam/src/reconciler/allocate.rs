//! Fresh allocation and its compensation.

use super::Reconciler;
use crate::error::ControllerError;
use crate::events::{REASON_ALLOCATION_SUCCEED, Severity};
use crate::metrics::AllocationKind;
use ipam::pod::pod_key;
use ipam::{AllocatedIP, Assignment, PodNetworkIntent, squash_ips, squash_subnets};
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use std::time::Instant;
use tracing::{error, info, warn};

impl Reconciler {
    /// Allocates fresh addresses and couples them to the pod.
    ///
    /// Observed as a `normal` allocation.
    pub(super) async fn allocate(
        &self,
        pod: &Pod,
        intent: &PodNetworkIntent,
        network: &str,
    ) -> Result<(), ControllerError> {
        let start = Instant::now();
        let result = self.allocate_fresh(pod, intent, network).await;
        self.metrics
            .observe_allocation(AllocationKind::Normal, result.is_ok(), start.elapsed());
        result
    }

    async fn allocate_fresh(
        &self,
        pod: &Pod,
        intent: &PodNetworkIntent,
        network: &str,
    ) -> Result<(), ControllerError> {
        let key = pod_key(pod);
        let family = intent
            .family(self.settings.dual_stack)
            .map_err(|e| ControllerError::ipam("resolve ip family", &key, e))?;
        let subnets = intent.subnet_names(self.settings.dual_stack);

        let ips = self
            .manager
            .allocate(family, network, &subnets, &pod.name_any(), &pod.namespace().unwrap_or_default())
            .await
            .map_err(|e| ControllerError::ipam("allocate", &key, e))?;

        if let Err(e) = self.store.couple(pod, &ips).await {
            self.compensate(pod, &ips).await;
            return Err(ControllerError::ipam("couple", &key, e));
        }

        self.allocation_succeeded(pod, &ips).await;
        Ok(())
    }

    /// Binds an engine assignment with `re_couple`.
    ///
    /// On failure only the addresses the assignment took from the free pool
    /// are released. Addresses the identity already held stay used, since
    /// their retained bindings still exist in the store.
    pub(super) async fn re_couple(&self, pod: &Pod, assignment: &Assignment) -> Result<(), ControllerError> {
        if let Err(e) = self.store.re_couple(pod, &assignment.ips).await {
            self.compensate(pod, &assignment.newly_used).await;
            return Err(ControllerError::ipam("re-couple", pod_key(pod), e));
        }
        self.allocation_succeeded(pod, &assignment.ips).await;
        Ok(())
    }

    /// Returns engine results that never made it into the store.
    ///
    /// Best-effort: a failure here must not mask the original error, so it is
    /// logged under the `compensation` target and counted instead.
    pub(super) async fn compensate(&self, pod: &Pod, ips: &[AllocatedIP]) {
        let Some(first) = ips.first() else {
            return;
        };
        let addresses = squash_ips(ips);
        warn!("Releasing {:?} of pod {} after a failed couple", addresses, pod_key(pod));

        if let Err(e) = self
            .manager
            .release(&first.network, &squash_subnets(ips), &addresses)
            .await
        {
            error!(
                target: "compensation",
                pod = %pod_key(pod),
                network = %first.network,
                "Failed to release {:?}, addresses may be leaked: {}",
                addresses,
                e
            );
            self.metrics.compensation_failed();
        }
    }

    async fn allocation_succeeded(&self, pod: &Pod, ips: &[AllocatedIP]) {
        let addresses = squash_ips(ips).join(",");
        info!("Allocated {} to pod {}", addresses, pod_key(pod));
        self.events
            .publish(pod, Severity::Normal, REASON_ALLOCATION_SUCCEED, format!("IP(s) {addresses} allocated"))
            .await;
    }
}
