//! Kubernetes resource watchers.
//!
//! Pods are driven through `kube_runtime::Controller`, which handles
//! reconnection, retries and per-object serialization. Networks and Nodes
//! are only read, so they are mirrored into reflector stores. Subnets feed
//! the allocation engine directly. IPInstance deletions, including those
//! done by the garbage collector when a pod goes away, free the address in
//! the engine.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crds::{IPInstance, Network, Subnet};
use futures::StreamExt;
use ipam::SubnetAllocator;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::reflector::{self, ObjectRef, Store};
use kube_runtime::{
    Controller, WatchStreamExt,
    controller::{Action, Config as ControllerConfig},
    watcher,
};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Retry delay after a failed pod reconcile
const ERROR_REQUEUE: Duration = Duration::from_secs(15);

/// Watches pods and reconciles each event until the stream ends.
///
/// The controller never runs two reconciles of the same pod at once;
/// `concurrency` bounds reconciles across pods.
pub async fn watch_pods(
    api: Api<Pod>,
    reconciler: Arc<Reconciler>,
    concurrency: u16,
) -> Result<(), ControllerError> {
    info!("Starting Pod watcher (concurrency {})", concurrency);

    let error_policy = |pod: Arc<Pod>, error: &ControllerError, _ctx: Arc<Reconciler>| {
        warn!(
            "Reconciliation error for Pod {}/{}: {}",
            pod.namespace().unwrap_or_default(),
            pod.name_any(),
            error
        );
        Action::requeue(ERROR_REQUEUE)
    };

    let reconcile = |pod: Arc<Pod>, ctx: Arc<Reconciler>| async move { ctx.reconcile_pod(&pod).await };

    Controller::new(api, watcher::Config::default())
        .with_config(ControllerConfig::default().concurrency(concurrency))
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((pod, _)) => debug!("Reconciled Pod {}", pod),
                Err(e) => debug!("Pod controller error: {}", e),
            }
        })
        .await;

    Ok(())
}

/// Mirrors a resource into a reflector store and waits for the first
/// complete listing.
pub async fn reflect<K>(api: Api<K>, resource_name: &str) -> Result<Store<K>, ControllerError>
where
    K: Resource + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (store, writer) = reflector::store();
    let name = resource_name.to_string();
    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect(writer)
        .for_each(move |res| {
            if let Err(e) = res {
                error!("{} reflector stream error: {}", name, e);
            }
            std::future::ready(())
        });
    tokio::spawn(stream);

    store
        .wait_until_ready()
        .await
        .map_err(|e| ControllerError::Watch(format!("{resource_name} store never became ready: {e}")))?;
    info!("{} store ready", resource_name);
    Ok(store)
}

/// Net ID a subnet inherits from its network, if any.
pub fn network_net_id(networks: &Store<Network>, subnet: &Subnet) -> Option<i32> {
    networks
        .get(&ObjectRef::new(&subnet.spec.network))
        .and_then(|network| network.spec.net_id)
}

/// Keeps the engine's subnet table in line with Subnet resources.
pub async fn watch_subnets(
    api: Api<Subnet>,
    engine: Arc<SubnetAllocator>,
    networks: Store<Network>,
) -> Result<(), ControllerError> {
    info!("Starting Subnet watcher");

    let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
    while let Some(event) = stream.next().await {
        match event {
            Ok(watcher::Event::Apply(subnet)) | Ok(watcher::Event::InitApply(subnet)) => {
                let name = subnet.name_any();
                match engine.upsert_subnet(&subnet, network_net_id(&networks, &subnet)) {
                    Ok(()) => debug!("Subnet {} loaded", name),
                    Err(e) => warn!("Ignoring Subnet {}: {}", name, e),
                }
            }
            Ok(watcher::Event::Delete(subnet)) => {
                let name = subnet.name_any();
                info!("Subnet deleted: {}", name);
                if let Err(e) = engine.remove_subnet(&name) {
                    warn!("Failed to drop Subnet {}: {}", name, e);
                }
            }
            Ok(watcher::Event::Init) => debug!("Subnet watcher initialized"),
            Ok(watcher::Event::InitDone) => info!("Subnet watcher initialization complete"),
            Err(e) => error!("Subnet watcher stream error: {}", e),
        }
    }

    Err(ControllerError::Watch("Subnet watch stream ended".to_string()))
}

/// Frees engine addresses of deleted IPInstances.
pub async fn watch_instances(api: Api<IPInstance>, engine: Arc<SubnetAllocator>) -> Result<(), ControllerError> {
    info!("Starting IPInstance watcher");

    let mut stream = Box::pin(watcher(api, watcher::Config::default()).default_backoff());
    while let Some(event) = stream.next().await {
        match event {
            Ok(event) => on_instance_event(&engine, &event),
            Err(e) => error!("IPInstance watcher stream error: {}", e),
        }
    }

    Err(ControllerError::Watch("IPInstance watch stream ended".to_string()))
}

fn on_instance_event(engine: &SubnetAllocator, event: &watcher::Event<IPInstance>) {
    let watcher::Event::Delete(instance) = event else {
        return;
    };
    let name = instance.name_any();
    match engine.release_instance(instance) {
        Ok(true) => info!("Released {} of deleted IPInstance {}", instance.plain_ip(), name),
        Ok(false) => debug!("IPInstance {} deleted, address already free or reassigned", name),
        Err(e) => warn!("Cannot release address of deleted IPInstance {}: {}", name, e),
    }
}
