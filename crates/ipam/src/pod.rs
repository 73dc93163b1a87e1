//! Pod lifecycle helpers.

use k8s_openapi::api::core::v1::Pod;

/// `namespace/name` of a pod, for logs and error messages.
#[must_use]
pub fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or_default(),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

/// Whether the pod's controlling owner is an identity-preserving workload.
#[must_use]
pub fn is_stateful(pod: &Pod) -> bool {
    pod.metadata
        .owner_references
        .as_ref()
        .is_some_and(|owners| {
            owners
                .iter()
                .any(|owner| owner.controller == Some(true) && owner.kind == "StatefulSet")
        })
}

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|status| status.phase.as_deref())
}

/// Failed with reason `Evicted`.
#[must_use]
pub fn is_evicted(pod: &Pod) -> bool {
    phase(pod) == Some("Failed")
        && pod
            .status
            .as_ref()
            .and_then(|status| status.reason.as_deref())
            == Some("Evicted")
}

/// Terminal phase (`Succeeded` or `Failed`).
#[must_use]
pub fn is_completed(pod: &Pod) -> bool {
    matches!(phase(pod), Some("Succeeded" | "Failed"))
}

/// Whether a deletion timestamp is set.
#[must_use]
pub fn is_deleting(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

/// Whether the pod shares the host network namespace.
#[must_use]
pub fn is_host_network(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.host_network)
        .unwrap_or(false)
}

/// Node the pod is scheduled on.
#[must_use]
pub fn node_name(pod: &Pod) -> Option<&str> {
    pod.spec
        .as_ref()
        .and_then(|spec| spec.node_name.as_deref())
        .filter(|node| !node.is_empty())
}

/// Ordinal parsed from the name suffix: `web-2` → `2`.
#[must_use]
pub fn ordinal_index(name: &str) -> Option<usize> {
    name.rsplit_once('-').and_then(|(_, suffix)| suffix.parse().ok())
}
