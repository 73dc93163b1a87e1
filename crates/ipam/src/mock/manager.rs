//! Recording allocation engine.

use crate::allocator::SubnetAllocator;
use crate::error::IpamError;
use crate::ipam_trait::IpamManager;
use crate::types::{AllocatedIP, Assignment, IpFamilyMode};
use crds::{AddressRange, IPVersion, Subnet, SubnetSpec};
use ipnet::IpNet;
use std::sync::{Arc, Mutex};

/// A call observed by [`MockIpamManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCall {
    /// `allocate`
    Allocate {
        /// Requested family
        family: IpFamilyMode,
        /// Network
        network: String,
        /// Subnet hints
        subnets: Vec<String>,
        /// `namespace/name`
        pod: String,
    },
    /// `assign`
    Assign {
        /// Requested family
        family: IpFamilyMode,
        /// Network
        network: String,
        /// Candidate addresses
        candidates: Vec<String>,
        /// `namespace/name`
        pod: String,
        /// Forced assignment
        forced: bool,
    },
    /// `release`
    Release {
        /// Network
        network: String,
        /// Subnets
        subnets: Vec<String>,
        /// Addresses
        ips: Vec<String>,
    },
}

/// Mock engine for testing
///
/// Delegates to a real [`SubnetAllocator`] so address uniqueness holds,
/// while recording calls and injecting failures on demand.
#[derive(Clone, Default)]
pub struct MockIpamManager {
    pub(crate) engine: Arc<SubnetAllocator>,
    pub(crate) calls: Arc<Mutex<Vec<ManagerCall>>>,
    pub(crate) fail_allocate: Arc<Mutex<bool>>,
    pub(crate) fail_assign: Arc<Mutex<bool>>,
    pub(crate) fail_release: Arc<Mutex<bool>>,
}

impl MockIpamManager {
    /// Create an engine without subnets
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subnet to the engine (for test setup)
    pub fn add_subnet(&self, network: &str, name: &str, cidr: &str) {
        let net: IpNet = cidr.parse().unwrap();
        let version = IPVersion::of(&net.addr());
        let subnet = Subnet::new(
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
        );
        self.engine.upsert_subnet(&subnet, None).unwrap();
    }

    /// Underlying engine, for direct inspection
    pub fn engine(&self) -> Arc<SubnetAllocator> {
        Arc::clone(&self.engine)
    }

    /// Calls observed so far
    pub fn calls(&self) -> Vec<ManagerCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Make every `allocate` fail
    pub fn set_allocate_failure(&self, fail: bool) {
        *self.fail_allocate.lock().unwrap() = fail;
    }

    /// Make every `assign` fail
    pub fn set_assign_failure(&self, fail: bool) {
        *self.fail_assign.lock().unwrap() = fail;
    }

    /// Make every `release` fail
    pub fn set_release_failure(&self, fail: bool) {
        *self.fail_release.lock().unwrap() = fail;
    }

    fn record(&self, call: ManagerCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl IpamManager for MockIpamManager {
    async fn allocate(
        &self,
        family: IpFamilyMode,
        network: &str,
        subnets: &[String],
        pod_name: &str,
        pod_namespace: &str,
    ) -> Result<Vec<AllocatedIP>, IpamError> {
        self.record(ManagerCall::Allocate {
            family,
            network: network.to_string(),
            subnets: subnets.to_vec(),
            pod: format!("{pod_namespace}/{pod_name}"),
        });
        if *self.fail_allocate.lock().unwrap() {
            return Err(IpamError::NoAvailableIP {
                network: network.to_string(),
                version: IPVersion::V4,
            });
        }
        self.engine
            .allocate(family, network, subnets, pod_name, pod_namespace)
            .await
    }

    async fn assign(
        &self,
        family: IpFamilyMode,
        network: &str,
        subnets: &[String],
        candidates: &[String],
        pod_name: &str,
        pod_namespace: &str,
        forced: bool,
    ) -> Result<Assignment, IpamError> {
        self.record(ManagerCall::Assign {
            family,
            network: network.to_string(),
            candidates: candidates.to_vec(),
            pod: format!("{pod_namespace}/{pod_name}"),
            forced,
        });
        if *self.fail_assign.lock().unwrap() {
            return Err(IpamError::NotAssignable {
                ip: candidates.join(","),
                network: network.to_string(),
            });
        }
        self.engine
            .assign(family, network, subnets, candidates, pod_name, pod_namespace, forced)
            .await
    }

    async fn release(&self, network: &str, subnets: &[String], ips: &[String]) -> Result<(), IpamError> {
        self.record(ManagerCall::Release {
            network: network.to_string(),
            subnets: subnets.to_vec(),
            ips: ips.to_vec(),
        });
        if *self.fail_release.lock().unwrap() {
            return Err(IpamError::SubnetNotFound(format!("release of {} refused", ips.join(","))));
        }
        self.engine.release(network, subnets, ips).await
    }
}
