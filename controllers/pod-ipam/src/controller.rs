//! Main controller implementation.
//!
//! Wires the Kubernetes-backed collaborators into the reconciler, seeds the
//! allocation engine and keeps every watcher running.

use crate::config::Config;
use crate::error::ControllerError;
use crate::events::KubeEventSink;
use crate::metrics::{self, Metrics};
use crate::pod_client::KubePodClient;
use crate::reconciler::{Reconciler, Settings};
use crate::selector::ReflectorNetworkIndex;
use crate::watcher::{network_net_id, reflect, watch_instances, watch_pods, watch_subnets};
use crds::{IPInstance, Network, Subnet};
use ipam::{IpamManager, KubeIpamStore, SubnetAllocator};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use kube_runtime::reflector::Store;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CONTROLLER_NAME: &str = "pod-ipam-controller";

/// Main controller for pod address management.
pub struct Controller {
    pod_watcher: JoinHandle<Result<(), ControllerError>>,
    subnet_watcher: JoinHandle<Result<(), ControllerError>>,
    instance_watcher: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Initializing Pod IPAM Controller");

        let client = Client::try_default().await?;

        let metrics = Arc::new(Metrics::new()?);
        let metrics_server = tokio::spawn(metrics::serve(config.metrics_addr, metrics.clone()));

        let networks: Store<Network> = reflect(Api::all(client.clone()), "Network").await?;
        let nodes: Store<Node> = reflect(Api::all(client.clone()), "Node").await?;

        let engine = Arc::new(SubnetAllocator::new());
        seed_engine(&client, &engine, &networks).await?;

        let manager: Arc<dyn IpamManager> = engine.clone();
        let reconciler = Arc::new(Reconciler {
            pods: Arc::new(KubePodClient::new(client.clone())),
            networks: Arc::new(ReflectorNetworkIndex::new(networks.clone(), nodes)),
            manager: manager.clone(),
            store: Arc::new(KubeIpamStore::new(client.clone(), manager)),
            events: Arc::new(KubeEventSink::new(client.clone(), CONTROLLER_NAME)),
            metrics: metrics.clone(),
            settings: Settings {
                default_ip_retain: config.default_ip_retain,
                dual_stack: config.dual_stack,
            },
        });

        let instance_watcher = tokio::spawn(watch_instances(Api::all(client.clone()), engine.clone()));
        let subnet_watcher = tokio::spawn(watch_subnets(Api::all(client.clone()), engine, networks));

        let pod_api: Api<Pod> = match config.watch_namespace.as_deref() {
            Some(ns) => Api::namespaced(client, ns),
            None => Api::all(client),
        };
        let pod_watcher = tokio::spawn(watch_pods(pod_api, reconciler, config.concurrency));

        metrics.set_ready();
        info!("Pod IPAM Controller ready");

        Ok(Self {
            pod_watcher,
            subnet_watcher,
            instance_watcher,
            metrics_server,
        })
    }

    /// Runs the controller until a watcher exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Pod IPAM Controller running");

        tokio::select! {
            result = &mut self.pod_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Pod watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Pod watcher error: {}", e)))?;
            }
            result = &mut self.subnet_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Subnet watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Subnet watcher error: {}", e)))?;
            }
            result = &mut self.instance_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("IPInstance watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("IPInstance watcher error: {}", e)))?;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Watch(format!("Metrics server panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Metrics server error: {}", e)))?;
            }
        }

        Ok(())
    }
}

/// Loads every Subnet, then marks the addresses of live IPInstances used.
///
/// Must finish before the first pod is reconciled, or the engine could hand
/// out an address that is already bound.
async fn seed_engine(
    client: &Client,
    engine: &SubnetAllocator,
    networks: &Store<Network>,
) -> Result<(), ControllerError> {
    let subnets: Api<Subnet> = Api::all(client.clone());
    let subnet_list = subnets.list(&ListParams::default()).await?;
    for subnet in &subnet_list.items {
        if let Err(e) = engine.upsert_subnet(subnet, network_net_id(networks, subnet)) {
            warn!("Ignoring Subnet {}: {}", subnet.name_any(), e);
        }
    }

    let instances: Api<IPInstance> = Api::all(client.clone());
    let instance_list = instances.list(&ListParams::default()).await?;
    let mut restored = 0;
    for instance in &instance_list.items {
        match engine.restore(instance) {
            Ok(()) => restored += 1,
            Err(e) => warn!("Cannot restore IPInstance {}: {}", instance.name_any(), e),
        }
    }

    info!(
        "Engine seeded with {} subnets and {} bound addresses",
        subnet_list.items.len(),
        restored
    );
    Ok(())
}
