//! Test utilities for building pods and subnets, plus an in-memory API
//! server for the IPInstance store

use crate::types::AllocatedIP;
use axum::http::{Request, Response, StatusCode};
use crds::{AddressRange, IPVersion, Subnet, SubnetSpec};
use k8s_openapi::api::core::v1::{Pod, PodSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

/// Helper to create a scheduled test pod
pub fn create_test_pod(name: &str, namespace: &str, uid: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some("node-a".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Helper to set annotations on a test pod
pub fn with_annotations(mut pod: Pod, annotations: &[(&str, &str)]) -> Pod {
    let map: BTreeMap<String, String> = annotations
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    pod.metadata.annotations = Some(map);
    pod
}

/// Helper to set labels on a test pod
pub fn with_labels(mut pod: Pod, labels: &[(&str, &str)]) -> Pod {
    let map: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    pod.metadata.labels = Some(map);
    pod
}

/// Helper to mark a test pod as owned by a StatefulSet
pub fn as_stateful(mut pod: Pod) -> Pod {
    pod.metadata.owner_references = Some(vec![OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: "StatefulSet".to_string(),
        name: "web".to_string(),
        uid: "sts-uid".to_string(),
        controller: Some(true),
        ..Default::default()
    }]);
    pod
}

/// Helper to create a test subnet
pub fn create_test_subnet(name: &str, network: &str, cidr: &str) -> Subnet {
    let version = if cidr.contains(':') { IPVersion::V6 } else { IPVersion::V4 };
    Subnet::new(
        name,
        SubnetSpec {
            network: network.to_string(),
            net_id: None,
            range: AddressRange {
                version,
                cidr: cidr.to_string(),
                gateway: None,
                start: None,
                end: None,
                reserved_ips: vec![],
                exclude_ips: vec![],
            },
        },
    )
}

/// Helper to build an engine result by hand
pub fn create_test_allocated_ip(network: &str, subnet: &str, cidr: &str) -> AllocatedIP {
    AllocatedIP {
        network: network.to_string(),
        subnet: subnet.to_string(),
        address: cidr.parse().unwrap(),
        gateway: None,
        net_id: None,
    }
}

/// Minimal in-memory Kubernetes API server for [`kube::Client`]
///
/// Serves get, list (label selector `k=v[,k=v]`), create, merge patch and
/// delete for any namespaced resource, keyed by `(plural, namespace, name)`.
/// Every request is logged as `"METHOD path"` and chosen requests can be
/// failed with a 500.
#[derive(Clone, Default)]
pub struct FakeApiServer {
    objects: Arc<Mutex<BTreeMap<(String, String, String), Value>>>,
    requests: Arc<Mutex<Vec<String>>>,
    failures: Arc<Mutex<Vec<Failure>>>,
}

struct Failure {
    method: String,
    fragment: String,
    remaining: usize,
}

impl FakeApiServer {
    /// A client talking to this server
    pub fn client(&self) -> Client {
        let server = self.clone();
        let service = tower::service_fn(move |req: Request<kube::client::Body>| {
            let server = server.clone();
            async move { Ok::<_, Infallible>(server.handle(req).await) }
        });
        Client::new(service, "default")
    }

    /// Seed an object, e.g. the pod the store annotates
    pub fn insert<K: Resource<DynamicType = ()> + Serialize>(&self, object: &K) {
        let plural = K::plural(&()).to_string();
        let meta = object.meta();
        let key = (
            plural,
            meta.namespace.clone().unwrap_or_default(),
            meta.name.clone().unwrap_or_default(),
        );
        let value = serde_json::to_value(object).unwrap();
        self.objects.lock().unwrap().insert(key, value);
    }

    /// Stored object, if any
    pub fn get<K: Resource<DynamicType = ()> + DeserializeOwned>(&self, namespace: &str, name: &str) -> Option<K> {
        let key = (K::plural(&()).to_string(), namespace.to_string(), name.to_string());
        self.objects
            .lock()
            .unwrap()
            .get(&key)
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    /// Number of stored objects of a kind
    pub fn count<K: Resource<DynamicType = ()>>(&self) -> usize {
        let plural = K::plural(&()).to_string();
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(p, _, _)| *p == plural)
            .count()
    }

    /// Requests served so far, as `"METHOD path"`
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// Fail the `nth` (1-based) request whose method matches and whose path
    /// contains `fragment`
    pub fn fail_nth(&self, method: &str, fragment: &str, nth: usize) {
        self.failures.lock().unwrap().push(Failure {
            method: method.to_string(),
            fragment: fragment.to_string(),
            remaining: nth,
        });
    }

    fn should_fail(&self, method: &str, path: &str) -> bool {
        let mut failures = self.failures.lock().unwrap();
        let mut fail = false;
        for failure in failures.iter_mut() {
            if failure.method == method && path.contains(&failure.fragment) && failure.remaining > 0 {
                failure.remaining -= 1;
                fail |= failure.remaining == 0;
            }
        }
        fail
    }

    async fn handle(&self, req: Request<kube::client::Body>) -> Response<axum::body::Body> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();
        let body = req.into_body().collect_bytes().await.unwrap();
        self.requests.lock().unwrap().push(format!("{method} {path}"));

        if self.should_fail(method.as_str(), &path) {
            return status(StatusCode::INTERNAL_SERVER_ERROR, "InternalError", "injected failure");
        }

        // .../namespaces/{ns}/{plural}[/{name}[/status]]
        let segments: Vec<&str> = path.split('/').collect();
        let Some(at) = segments.iter().position(|s| *s == "namespaces") else {
            return status(StatusCode::NOT_FOUND, "NotFound", &path);
        };
        let namespace = segments.get(at + 1).copied().unwrap_or_default().to_string();
        let plural = segments.get(at + 2).copied().unwrap_or_default().to_string();
        let name = segments.get(at + 3).map(|s| s.to_string());

        let mut objects = self.objects.lock().unwrap();
        match (method.as_str(), name) {
            ("GET", None) => {
                let selector = label_selector(&query);
                let items: Vec<Value> = objects
                    .iter()
                    .filter(|((p, ns, _), _)| *p == plural && *ns == namespace)
                    .map(|(_, value)| value.clone())
                    .filter(|value| {
                        selector
                            .iter()
                            .all(|(k, v)| value["metadata"]["labels"][k].as_str() == Some(v.as_str()))
                    })
                    .collect();
                json_response(StatusCode::OK, &json!({ "kind": "List", "apiVersion": "v1", "metadata": {}, "items": items }))
            }
            ("GET", Some(name)) => match objects.get(&(plural, namespace, name.clone())) {
                Some(value) => json_response(StatusCode::OK, value),
                None => status(StatusCode::NOT_FOUND, "NotFound", &name),
            },
            ("POST", _) => {
                let mut value: Value = serde_json::from_slice(&body).unwrap();
                let name = value["metadata"]["name"].as_str().unwrap_or_default().to_string();
                let key = (plural, namespace.clone(), name.clone());
                if objects.contains_key(&key) {
                    return status(StatusCode::CONFLICT, "AlreadyExists", &name);
                }
                value["metadata"]["namespace"] = json!(namespace);
                value["metadata"]["uid"] = json!(uuid::Uuid::new_v4().to_string());
                objects.insert(key, value.clone());
                json_response(StatusCode::CREATED, &value)
            }
            ("PATCH", Some(name)) => match objects.get_mut(&(plural, namespace, name.clone())) {
                Some(value) => {
                    let patch: Value = serde_json::from_slice(&body).unwrap();
                    merge_patch(value, &patch);
                    json_response(StatusCode::OK, value)
                }
                None => status(StatusCode::NOT_FOUND, "NotFound", &name),
            },
            ("DELETE", Some(name)) => match objects.remove(&(plural, namespace, name.clone())) {
                Some(value) => json_response(StatusCode::OK, &value),
                None => status(StatusCode::NOT_FOUND, "NotFound", &name),
            },
            _ => status(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", &path),
        }
    }
}

/// JSON merge patch: objects merge recursively, `null` removes a key
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(entries) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(fields) = target {
        for (key, value) in entries {
            if value.is_null() {
                fields.remove(key);
            } else {
                merge_patch(fields.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

fn label_selector(query: &str) -> Vec<(String, String)> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .filter(|(key, _)| *key == "labelSelector")
        .flat_map(|(_, value)| {
            percent_decode(value)
                .split(',')
                .filter_map(|term| term.split_once('=').map(|(k, v)| (k.to_string(), v.to_string())))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap();
                out.push(u8::from_str_radix(hex, 16).unwrap());
                i += 3;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    String::from_utf8(out).unwrap()
}

fn json_response(code: StatusCode, value: &Value) -> Response<axum::body::Body> {
    Response::builder()
        .status(code)
        .header("content-type", "application/json")
        .body(axum::body::Body::from(value.to_string()))
        .unwrap()
}

fn status(code: StatusCode, reason: &str, message: &str) -> Response<axum::body::Body> {
    json_response(
        code,
        &json!({
            "kind": "Status",
            "apiVersion": "v1",
            "metadata": {},
            "status": "Failure",
            "message": message,
            "reason": reason,
            "code": code.as_u16(),
        }),
    )
}
