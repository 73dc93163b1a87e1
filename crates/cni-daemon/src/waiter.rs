//! Waiting for the controller's bindings to become visible.
//!
//! The controller and this daemon share no transaction; the only signal
//! that allocation finished is the IPInstances appearing. [`BindingWaiter`]
//! hides how that is observed so a watch-driven implementation can replace
//! polling without touching the handlers.

use crate::cluster::{BindingQuery, ClusterApi};
use crate::error::DaemonError;
use crds::IPInstance;
use std::time::Duration;
use tracing::debug;

/// Blocks until a pod interface has the expected number of bindings.
#[async_trait::async_trait]
pub trait BindingWaiter: Send + Sync {
    /// Returns the live bindings once exactly `expected` are visible.
    async fn wait_for_bindings(
        &self,
        cluster: &dyn ClusterApi,
        query: &BindingQuery,
        expected: usize,
    ) -> Result<Vec<IPInstance>, DaemonError>;
}

/// Lists with exponential backoff: sleep `base`, list, double, repeat.
#[derive(Debug, Clone, Copy)]
pub struct PollingWaiter {
    base: Duration,
    retries: u32,
}

impl PollingWaiter {
    /// At least one attempt is always made.
    #[must_use]
    pub fn new(base: Duration, retries: u32) -> Self {
        Self {
            base,
            retries: retries.max(1),
        }
    }
}

#[async_trait::async_trait]
impl BindingWaiter for PollingWaiter {
    async fn wait_for_bindings(
        &self,
        cluster: &dyn ClusterApi,
        query: &BindingQuery,
        expected: usize,
    ) -> Result<Vec<IPInstance>, DaemonError> {
        let mut delay = self.base;
        let mut observed = 0;

        for attempt in 1..=self.retries {
            tokio::time::sleep(delay).await;
            delay = delay.saturating_mul(2);

            let live: Vec<IPInstance> = cluster
                .list_bound_instances(query)
                .await?
                .into_iter()
                .filter(|instance| instance.metadata.deletion_timestamp.is_none())
                .collect();

            if live.len() == expected {
                debug!("Pod {} converged after {} attempts", query.pod_key(), attempt);
                return Ok(live);
            }
            observed = live.len();
        }

        Err(DaemonError::NotConverged {
            pod: query.pod_key(),
            expected,
            observed,
        })
    }
}
