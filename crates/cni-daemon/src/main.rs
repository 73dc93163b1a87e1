//! PodNet node daemon binary.

use cni_daemon::{Config, Daemon, DaemonError, DryRunNic, KubeClusterApi, PollingWaiter, serve};
use kube::Client;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting PodNet node daemon");

    let config = Config::from_env()?;

    info!("Configuration:");
    info!("  Node: {}", config.node_name);
    info!("  Socket: {}", config.socket_path.display());
    info!("  Patch Calico pod IPs: {}", config.patch_calico_pod_ips);
    info!("  Dual stack: {}", config.dual_stack);
    info!("  Binding poll: {:?} x{}", config.poll_base, config.poll_retries);

    let client = Client::try_default().await?;
    let socket_path = config.socket_path.clone();
    let waiter = PollingWaiter::new(config.poll_base, config.poll_retries);

    let daemon = Arc::new(Daemon::new(
        config,
        Arc::new(KubeClusterApi::new(client)),
        Arc::new(waiter),
        Arc::new(DryRunNic),
    ));

    serve(&socket_path, daemon).await
}
