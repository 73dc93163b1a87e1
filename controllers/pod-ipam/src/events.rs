//! Kubernetes Events attached to pods.

use k8s_openapi::api::core::v1::Pod;
use kube::{Client, Resource};
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Allocation succeeded
pub const REASON_ALLOCATION_SUCCEED: &str = "IPAllocationSucceed";
/// Any reconcile failure
pub const REASON_ALLOCATION_FAIL: &str = "IPAllocationFail";
/// Addresses decoupled from an evicted/completed pod
pub const REASON_RELEASE_SUCCEED: &str = "IPReleaseSucceed";
/// Addresses of a terminating stateful pod reserved
pub const REASON_RESERVE_SUCCEED: &str = "IPReserveSucceed";

/// Severity of a pod event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// Best-effort event publication. Failures are logged, never returned.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, pod: &Pod, severity: Severity, reason: &str, message: String);
}

/// Publishes events through the kube-runtime recorder.
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait::async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, pod: &Pod, severity: Severity, reason: &str, message: String) {
        let event = Event {
            type_: match severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: reason.to_string(),
            note: Some(message),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, &pod.object_ref(&())).await {
            warn!("Failed to publish {} event: {}", reason, e);
        }
    }
}
