//! Pod IPAM Controller
//!
//! Watches pods and drives their address lifecycle:
//! - Stateless pods: allocate and couple fresh addresses
//! - Stateful pods: reuse, pre-assign or reallocate per retention policy
//! - Terminating stateful pods: reserve addresses for the next incarnation
//! - Evicted/completed pods: decouple
//!
//! Bindings are persisted as IPInstance resources for the node daemon.

mod config;
mod controller;
mod error;
mod events;
mod metrics;
mod pod_client;
mod reconciler;
mod selector;
mod watcher;
#[cfg(test)]
mod test_utils;

use config::Config;
use controller::Controller;
use crate::error::ControllerError;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Pod IPAM Controller");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", config.concurrency);
    info!("  Default IP retain: {}", config.default_ip_retain);
    info!("  Dual stack: {}", config.dual_stack);
    info!("  Metrics address: {}", config.metrics_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
