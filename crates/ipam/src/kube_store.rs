//! Binding store backed by IPInstance resources.
//!
//! Every binding is one namespaced `IPInstance` named after its address.
//! Deleting an instance is always followed by releasing the address in the
//! engine, so an address is never free while an instance still holds it.
//!
//! Instances of non-stateful pods carry the pod as owner, so the garbage
//! collector removes them with the pod. A couple that fails halfway undoes
//! its own writes before returning the error.

use crate::error::IpamError;
use crate::ipam_trait::{IpamManager, IpamStore};
use crate::pod::{is_stateful, node_name, pod_key};
use crate::types::AllocatedIP;
use crds::constants::{
    ANNOTATION_IP, DEFAULT_INTERFACE_NAME, LABEL_INTERFACE_NAME, LABEL_NETWORK, LABEL_NODE,
    LABEL_POD_NAME, LABEL_POD_UID, LABEL_SUBNET,
};
use crds::{Address, IPInstance, IPInstanceSpec, IPPhase, instance_name};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// IPInstance-backed [`IpamStore`].
pub struct KubeIpamStore {
    client: Client,
    engine: Arc<dyn IpamManager>,
}

struct PodRef<'a> {
    name: &'a str,
    namespace: &'a str,
    uid: &'a str,
    node: &'a str,
}

impl<'a> PodRef<'a> {
    fn from_pod(pod: &'a Pod) -> Result<Self, IpamError> {
        let name = pod
            .metadata
            .name
            .as_deref()
            .ok_or_else(|| IpamError::InvalidPod("pod missing name".to_string()))?;
        let namespace = pod
            .metadata
            .namespace
            .as_deref()
            .ok_or_else(|| IpamError::InvalidPod(format!("pod {name} missing namespace")))?;
        let uid = pod
            .metadata
            .uid
            .as_deref()
            .ok_or_else(|| IpamError::InvalidPod(format!("pod {namespace}/{name} missing uid")))?;
        Ok(Self {
            name,
            namespace,
            uid,
            node: node_name(pod).unwrap_or_default(),
        })
    }
}

/// Writes a couple has made so far.
#[derive(Default)]
struct Undo {
    /// Instances this couple created
    created: Vec<String>,
    /// Prior state of existing instances this couple relabeled
    relabeled: Vec<IPInstance>,
}

/// Locally administered unicast MAC derived from a random UUID.
#[must_use]
pub fn generate_mac() -> String {
    let bytes = uuid::Uuid::new_v4().into_bytes();
    let first = (bytes[0] & 0xfe) | 0x02;
    format!(
        "{first:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        bytes[1], bytes[2], bytes[3], bytes[4], bytes[5]
    )
}

/// Converts a stored instance back into an engine record.
pub fn allocated_ip_from_instance(instance: &IPInstance) -> Result<AllocatedIP, IpamError> {
    let address = instance
        .spec
        .address
        .ip
        .parse()
        .map_err(|_| IpamError::InvalidIP(instance.spec.address.ip.clone()))?;
    let gateway = instance
        .spec
        .address
        .gateway
        .as_deref()
        .map(|gw| gw.parse().map_err(|_| IpamError::InvalidIP(gw.to_string())))
        .transpose()?;
    Ok(AllocatedIP {
        network: instance.spec.network.clone(),
        subnet: instance.spec.subnet.clone(),
        address,
        gateway,
        net_id: instance.spec.address.net_id,
    })
}

impl KubeIpamStore {
    /// Creates a store writing through `client` and releasing through `engine`.
    pub fn new(client: Client, engine: Arc<dyn IpamManager>) -> Self {
        Self { client, engine }
    }

    fn api(&self, namespace: &str) -> Api<IPInstance> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn labels(pod: &PodRef<'_>, ip: &AllocatedIP) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_NODE.to_string(), pod.node.to_string()),
            (LABEL_POD_UID.to_string(), pod.uid.to_string()),
            (LABEL_POD_NAME.to_string(), pod.name.to_string()),
            (LABEL_INTERFACE_NAME.to_string(), DEFAULT_INTERFACE_NAME.to_string()),
            (LABEL_NETWORK.to_string(), ip.network.clone()),
            (LABEL_SUBNET.to_string(), ip.subnet.clone()),
        ])
    }

    fn build_instance(
        pod: &PodRef<'_>,
        ip: &AllocatedIP,
        mac: &str,
        owner: Option<OwnerReference>,
    ) -> IPInstance {
        let mut instance = IPInstance::new(
            &instance_name(&ip.ip().to_string()),
            IPInstanceSpec {
                network: ip.network.clone(),
                subnet: ip.subnet.clone(),
                address: Address {
                    ip: ip.address.to_string(),
                    mac: mac.to_string(),
                    gateway: ip.gateway.map(|gw| gw.to_string()),
                    version: ip.version(),
                    net_id: ip.net_id,
                },
            },
        );
        instance.metadata = ObjectMeta {
            name: instance.metadata.name.take(),
            namespace: Some(pod.namespace.to_string()),
            labels: Some(Self::labels(pod, ip)),
            owner_references: owner.map(|owner| vec![owner]),
            ..Default::default()
        };
        instance
    }

    async fn mark_bound(&self, pod: &PodRef<'_>, name: &str) -> Result<(), IpamError> {
        let patch = json!({
            "status": {
                "podName": pod.name,
                "podNamespace": pod.namespace,
                "nodeName": pod.node,
                "phase": IPPhase::Using,
            }
        });
        self.api(pod.namespace)
            .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    /// Writes the address-assigned fence onto the pod.
    async fn mark_pod(&self, pod: &PodRef<'_>, ips: &[AllocatedIP]) -> Result<(), IpamError> {
        let value = ips
            .iter()
            .map(|ip| ip.ip().to_string())
            .collect::<Vec<_>>()
            .join(",");
        let patch = json!({ "metadata": { "annotations": { ANNOTATION_IP: value } } });
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), pod.namespace);
        pods.patch(pod.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn instances_of(&self, name: &str, namespace: &str) -> Result<Vec<IPInstance>, IpamError> {
        let params = ListParams::default().labels(&format!("{LABEL_POD_NAME}={name}"));
        let list = self.api(namespace).list(&params).await?;
        Ok(list.items.into_iter().filter(|i| !i.is_deleting()).collect())
    }

    async fn delete_and_release(&self, namespace: &str, instance: &IPInstance) -> Result<(), IpamError> {
        let name = instance.metadata.name.clone().unwrap_or_default();
        match self.api(namespace).delete(&name, &DeleteParams::default()).await {
            Ok(_) => {}
            Err(e) => {
                let err = IpamError::from(e);
                if !err.is_not_found() {
                    return Err(err);
                }
            }
        }
        self.engine
            .release(
                &instance.spec.network,
                &[instance.spec.subnet.clone()],
                &[instance.plain_ip().to_string()],
            )
            .await
    }

    async fn unbind(&self, namespace: &str, instance: &IPInstance) -> Result<(), IpamError> {
        let name = instance.metadata.name.clone().unwrap_or_default();
        let api = self.api(namespace);
        let labels = json!({ "metadata": { "labels": { LABEL_NODE: null } } });
        api.patch(&name, &PatchParams::default(), &Patch::Merge(&labels))
            .await?;
        let status = json!({
            "status": { "phase": IPPhase::Reserved, "nodeName": null, "sandboxID": null }
        });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&status))
            .await?;
        Ok(())
    }

    async fn write_couple(
        &self,
        pod: &Pod,
        pod_ref: &PodRef<'_>,
        ips: &[AllocatedIP],
        undo: &mut Undo,
    ) -> Result<(), IpamError> {
        let mac = generate_mac();
        let owner = if is_stateful(pod) { None } else { pod.controller_owner_ref(&()) };
        let api = self.api(pod_ref.namespace);

        for ip in ips {
            let instance = Self::build_instance(pod_ref, ip, &mac, owner.clone());
            let name = instance.metadata.name.clone().unwrap_or_default();
            api.create(&PostParams::default(), &instance).await?;
            undo.created.push(name.clone());
            self.mark_bound(pod_ref, &name).await?;
            debug!("Created IPInstance {}/{} for {}", pod_ref.namespace, name, pod_key(pod));
        }

        self.mark_pod(pod_ref, ips).await
    }

    async fn write_re_couple(
        &self,
        pod_ref: &PodRef<'_>,
        ips: &[AllocatedIP],
        undo: &mut Undo,
    ) -> Result<(), IpamError> {
        let api = self.api(pod_ref.namespace);

        let mut existing = Vec::with_capacity(ips.len());
        for ip in ips {
            existing.push(api.get_opt(&instance_name(&ip.ip().to_string())).await?);
        }
        let mac = existing
            .iter()
            .flatten()
            .map(|instance| instance.spec.address.mac.clone())
            .next()
            .unwrap_or_else(generate_mac);

        for (ip, current) in ips.iter().zip(existing) {
            let name = instance_name(&ip.ip().to_string());
            match current {
                Some(previous) => {
                    let patch = json!({ "metadata": { "labels": Self::labels(pod_ref, ip) } });
                    api.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                        .await?;
                    undo.relabeled.push(previous);
                }
                None => {
                    api.create(&PostParams::default(), &Self::build_instance(pod_ref, ip, &mac, None))
                        .await?;
                    undo.created.push(name.clone());
                }
            }
            self.mark_bound(pod_ref, &name).await?;
        }

        self.mark_pod(pod_ref, ips).await
    }

    /// Best-effort undo of a failed couple. Failures are logged, the
    /// original error is what the caller sees.
    async fn roll_back(&self, pod_ref: &PodRef<'_>, undo: Undo) {
        let api = self.api(pod_ref.namespace);

        for name in undo.created.iter().rev() {
            if let Err(e) = api.delete(name, &DeleteParams::default()).await {
                let err = IpamError::from(e);
                if !err.is_not_found() {
                    warn!("Failed to remove IPInstance {}/{} after a failed couple: {}", pod_ref.namespace, name, err);
                }
            }
        }

        for previous in undo.relabeled.iter().rev() {
            let name = previous.metadata.name.clone().unwrap_or_default();
            if let Err(e) = Self::restore(&api, &name, previous).await {
                warn!("Failed to restore IPInstance {}/{} after a failed couple: {}", pod_ref.namespace, name, e);
            }
        }
    }

    /// Puts the labels and binding status of `previous` back.
    async fn restore(api: &Api<IPInstance>, name: &str, previous: &IPInstance) -> Result<(), IpamError> {
        let old_labels = previous.metadata.labels.clone().unwrap_or_default();
        let labels: Map<String, Value> = [
            LABEL_NODE,
            LABEL_POD_UID,
            LABEL_POD_NAME,
            LABEL_INTERFACE_NAME,
            LABEL_NETWORK,
            LABEL_SUBNET,
        ]
        .into_iter()
        .map(|key| {
            let value = old_labels.get(key).map_or(Value::Null, |v| Value::String(v.clone()));
            (key.to_string(), value)
        })
        .collect();
        api.patch(name, &PatchParams::default(), &Patch::Merge(&json!({ "metadata": { "labels": labels } })))
            .await?;

        let status = previous.status.clone().unwrap_or_default();
        let patch = json!({
            "status": {
                "podName": status.pod_name,
                "podNamespace": status.pod_namespace,
                "nodeName": status.node_name,
                "phase": status.phase,
                "sandboxID": status.sandbox_id,
            }
        });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl IpamStore for KubeIpamStore {
    async fn couple(&self, pod: &Pod, ips: &[AllocatedIP]) -> Result<(), IpamError> {
        let pod_ref = PodRef::from_pod(pod)?;
        let mut undo = Undo::default();
        if let Err(e) = self.write_couple(pod, &pod_ref, ips, &mut undo).await {
            self.roll_back(&pod_ref, undo).await;
            return Err(e);
        }
        info!("Coupled {} IP(s) with pod {}", ips.len(), pod_key(pod));
        Ok(())
    }

    async fn re_couple(&self, pod: &Pod, ips: &[AllocatedIP]) -> Result<(), IpamError> {
        let pod_ref = PodRef::from_pod(pod)?;
        let mut undo = Undo::default();
        if let Err(e) = self.write_re_couple(&pod_ref, ips, &mut undo).await {
            self.roll_back(&pod_ref, undo).await;
            return Err(e);
        }
        info!("Re-coupled {} IP(s) with pod {}", ips.len(), pod_key(pod));
        Ok(())
    }

    async fn de_couple(&self, pod: &Pod) -> Result<(), IpamError> {
        let pod_ref = PodRef::from_pod(pod)?;
        let stateful = is_stateful(pod);

        for instance in self.instances_of(pod_ref.name, pod_ref.namespace).await? {
            let bound_uid = instance
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(LABEL_POD_UID))
                .map(String::as_str);
            if bound_uid != Some(pod_ref.uid) {
                continue;
            }
            if stateful {
                self.unbind(pod_ref.namespace, &instance).await?;
            } else {
                self.delete_and_release(pod_ref.namespace, &instance).await?;
            }
        }
        info!("Decoupled IPs of pod {}", pod_key(pod));
        Ok(())
    }

    async fn ip_reserve(&self, pod: &Pod) -> Result<(), IpamError> {
        let pod_ref = PodRef::from_pod(pod)?;
        for instance in self.instances_of(pod_ref.name, pod_ref.namespace).await? {
            self.unbind(pod_ref.namespace, &instance).await?;
        }
        info!("Reserved IPs of pod {}", pod_key(pod));
        Ok(())
    }

    async fn ip_recycle(&self, namespace: &str, ip: &AllocatedIP) -> Result<(), IpamError> {
        let name = instance_name(&ip.ip().to_string());
        match self.api(namespace).get_opt(&name).await? {
            Some(instance) => self.delete_and_release(namespace, &instance).await,
            None => {
                self.engine
                    .release(&ip.network, &[ip.subnet.clone()], &[ip.ip().to_string()])
                    .await
            }
        }
    }

    async fn allocated_ips(&self, pod: &Pod) -> Result<Vec<AllocatedIP>, IpamError> {
        let pod_ref = PodRef::from_pod(pod)?;
        let mut instances = self.instances_of(pod_ref.name, pod_ref.namespace).await?;
        instances.sort_by_key(|instance| instance.spec.address.version);
        instances.iter().map(allocated_ip_from_instance).collect()
    }
}
