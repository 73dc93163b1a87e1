//! Recording binding store.

use crate::error::IpamError;
use crate::ipam_trait::{IpamManager, IpamStore};
use crate::pod::pod_key;
use crate::types::{AllocatedIP, squash_ips};
use crds::IPPhase;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// A call observed by [`MockIpamStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    /// `couple`
    Couple {
        /// `namespace/name`
        pod: String,
        /// Bare addresses
        ips: Vec<String>,
    },
    /// `re_couple`
    ReCouple {
        /// `namespace/name`
        pod: String,
        /// Bare addresses
        ips: Vec<String>,
    },
    /// `de_couple`
    DeCouple {
        /// `namespace/name`
        pod: String,
    },
    /// `ip_reserve`
    Reserve {
        /// `namespace/name`
        pod: String,
    },
    /// `ip_recycle`
    Recycle {
        /// Namespace
        namespace: String,
        /// Bare address
        ip: String,
    },
}

/// One stored binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockBinding {
    /// Bound address
    pub ip: AllocatedIP,
    /// UID of the pod incarnation
    pub pod_uid: String,
    /// Binding phase
    pub phase: IPPhase,
}

/// Mock binding store for testing
///
/// Bindings are keyed by `namespace/name`. When built with an engine,
/// recycling and decoupling release addresses there, like the real store.
#[derive(Clone, Default)]
pub struct MockIpamStore {
    pub(crate) bindings: Arc<Mutex<BTreeMap<String, Vec<MockBinding>>>>,
    pub(crate) calls: Arc<Mutex<Vec<StoreCall>>>,
    pub(crate) engine: Option<Arc<dyn IpamManager>>,
    pub(crate) fail_couple: Arc<Mutex<bool>>,
    pub(crate) fail_recycle: Arc<Mutex<bool>>,
}

fn uid_of(pod: &Pod) -> String {
    pod.metadata.uid.clone().unwrap_or_default()
}

impl MockIpamStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store that releases through `engine`
    pub fn with_engine(engine: Arc<dyn IpamManager>) -> Self {
        Self {
            engine: Some(engine),
            ..Self::default()
        }
    }

    /// Add a binding (for test setup)
    pub fn add_binding(&self, pod_key: &str, pod_uid: &str, ip: AllocatedIP, phase: IPPhase) {
        self.bindings
            .lock()
            .unwrap()
            .entry(pod_key.to_string())
            .or_default()
            .push(MockBinding {
                ip,
                pod_uid: pod_uid.to_string(),
                phase,
            });
    }

    /// Bindings of `namespace/name`
    pub fn bindings_of(&self, pod_key: &str) -> Vec<MockBinding> {
        self.bindings
            .lock()
            .unwrap()
            .get(pod_key)
            .cloned()
            .unwrap_or_default()
    }

    /// Calls observed so far
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every `couple` / `re_couple` fail
    pub fn set_couple_failure(&self, fail: bool) {
        *self.fail_couple.lock().unwrap() = fail;
    }

    /// Make every `ip_recycle` fail
    pub fn set_recycle_failure(&self, fail: bool) {
        *self.fail_recycle.lock().unwrap() = fail;
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn bind(&self, pod: &Pod, ips: &[AllocatedIP]) {
        let uid = uid_of(pod);
        let mut bindings = self.bindings.lock().unwrap();
        let entry = bindings.entry(pod_key(pod)).or_default();
        entry.retain(|binding| !ips.iter().any(|ip| ip.ip() == binding.ip.ip()));
        entry.extend(ips.iter().map(|ip| MockBinding {
            ip: ip.clone(),
            pod_uid: uid.clone(),
            phase: IPPhase::Using,
        }));
    }

    async fn release(&self, ip: &AllocatedIP) -> Result<(), IpamError> {
        match &self.engine {
            Some(engine) => {
                engine
                    .release(&ip.network, &[ip.subnet.clone()], &[ip.ip().to_string()])
                    .await
            }
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl IpamStore for MockIpamStore {
    async fn couple(&self, pod: &Pod, ips: &[AllocatedIP]) -> Result<(), IpamError> {
        self.record(StoreCall::Couple {
            pod: pod_key(pod),
            ips: squash_ips(ips),
        });
        if *self.fail_couple.lock().unwrap() {
            return Err(IpamError::InvalidPod(format!("couple of {} refused", pod_key(pod))));
        }
        self.bind(pod, ips);
        Ok(())
    }

    async fn re_couple(&self, pod: &Pod, ips: &[AllocatedIP]) -> Result<(), IpamError> {
        self.record(StoreCall::ReCouple {
            pod: pod_key(pod),
            ips: squash_ips(ips),
        });
        if *self.fail_couple.lock().unwrap() {
            return Err(IpamError::InvalidPod(format!("re-couple of {} refused", pod_key(pod))));
        }
        self.bind(pod, ips);
        Ok(())
    }

    async fn de_couple(&self, pod: &Pod) -> Result<(), IpamError> {
        self.record(StoreCall::DeCouple { pod: pod_key(pod) });
        let uid = uid_of(pod);
        let removed: Vec<MockBinding> = {
            let mut bindings = self.bindings.lock().unwrap();
            let entry = bindings.entry(pod_key(pod)).or_default();
            let (removed, kept) = entry.drain(..).partition(|binding| binding.pod_uid == uid);
            *entry = kept;
            removed
        };
        for binding in removed {
            self.release(&binding.ip).await?;
        }
        Ok(())
    }

    async fn ip_reserve(&self, pod: &Pod) -> Result<(), IpamError> {
        self.record(StoreCall::Reserve { pod: pod_key(pod) });
        if let Some(entry) = self.bindings.lock().unwrap().get_mut(&pod_key(pod)) {
            for binding in entry.iter_mut() {
                binding.phase = IPPhase::Reserved;
            }
        }
        Ok(())
    }

    async fn ip_recycle(&self, namespace: &str, ip: &AllocatedIP) -> Result<(), IpamError> {
        self.record(StoreCall::Recycle {
            namespace: namespace.to_string(),
            ip: ip.ip().to_string(),
        });
        if *self.fail_recycle.lock().unwrap() {
            return Err(IpamError::InvalidPod(format!("recycle of {ip} refused")));
        }
        {
            let mut bindings = self.bindings.lock().unwrap();
            for (key, entry) in bindings.iter_mut() {
                if key.starts_with(&format!("{namespace}/")) {
                    entry.retain(|binding| binding.ip.ip() != ip.ip());
                }
            }
        }
        self.release(ip).await
    }

    async fn allocated_ips(&self, pod: &Pod) -> Result<Vec<AllocatedIP>, IpamError> {
        let mut ips: Vec<AllocatedIP> = self
            .bindings_of(&pod_key(pod))
            .into_iter()
            .map(|binding| binding.ip)
            .collect();
        ips.sort_by_key(AllocatedIP::version);
        Ok(ips)
    }
}
