//! In-memory allocation engine.
//!
//! Each subnet sits behind its own mutex; the subnet map itself is only
//! write-locked when subnets are added or removed. Allocations against
//! different subnets therefore never contend.

use crate::error::IpamError;
use crate::ipam_trait::IpamManager;
use crate::pool::SubnetPool;
use crate::types::{AllocatedIP, Assignment, IpFamilyMode};
use crds::{IPInstance, IPVersion, Subnet};
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

type SharedPool = Arc<Mutex<SubnetPool>>;

/// Per-subnet locked allocation engine.
#[derive(Debug, Default)]
pub struct SubnetAllocator {
    subnets: RwLock<BTreeMap<String, SharedPool>>,
}

fn lock_poisoned(what: &str) -> IpamError {
    IpamError::InvalidSubnet {
        name: what.to_string(),
        reason: "lock poisoned".to_string(),
    }
}

fn owner(pod_name: &str, pod_namespace: &str) -> String {
    format!("{pod_namespace}/{pod_name}")
}

/// Holder recorded for an instance: its pod, else just its namespace.
fn holder_of(instance: &IPInstance) -> String {
    match &instance.status {
        Some(status) => owner(
            status.pod_name.as_deref().unwrap_or_default(),
            status.pod_namespace.as_deref().unwrap_or_default(),
        ),
        None => instance.metadata.namespace.clone().unwrap_or_default(),
    }
}

fn instance_ip(instance: &IPInstance) -> Result<IpAddr, IpamError> {
    instance
        .plain_ip()
        .parse()
        .map_err(|_| IpamError::InvalidIP(instance.spec.address.ip.clone()))
}

impl SubnetAllocator {
    /// Creates an empty engine.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subnet or refreshes its definition, keeping current usage.
    pub fn upsert_subnet(&self, subnet: &Subnet, network_net_id: Option<i32>) -> Result<(), IpamError> {
        let pool = SubnetPool::from_subnet(subnet, network_net_id)?;
        let name = pool.name().to_string();
        let mut subnets = self.subnets.write().map_err(|_| lock_poisoned("subnets"))?;
        match subnets.get(&name) {
            Some(existing) => {
                existing
                    .lock()
                    .map_err(|_| lock_poisoned(&name))?
                    .update_from(pool);
                debug!("Updated subnet {}", name);
            }
            None => {
                info!("Registered subnet {} in network {}", name, pool.network());
                subnets.insert(name, Arc::new(Mutex::new(pool)));
            }
        }
        Ok(())
    }

    /// Forgets a subnet.
    pub fn remove_subnet(&self, name: &str) -> Result<(), IpamError> {
        let mut subnets = self.subnets.write().map_err(|_| lock_poisoned("subnets"))?;
        if subnets.remove(name).is_some() {
            info!("Removed subnet {}", name);
        }
        Ok(())
    }

    /// Marks the address of a live IPInstance as used.
    ///
    /// Called on startup so the engine agrees with the bindings that survived
    /// a restart.
    pub fn restore(&self, instance: &IPInstance) -> Result<(), IpamError> {
        if instance.is_deleting() {
            return Ok(());
        }
        let ip = instance_ip(instance)?;
        let pool = self.pool(&instance.spec.subnet)?;
        pool.lock()
            .map_err(|_| lock_poisoned(&instance.spec.subnet))?
            .assign(ip, &holder_of(instance), true)?;
        Ok(())
    }

    /// Frees the address of a deleted IPInstance, provided the engine still
    /// records that instance's pod as the holder. Returns whether the
    /// address was freed.
    ///
    /// An address the engine has meanwhile handed to another pod is left
    /// alone.
    pub fn release_instance(&self, instance: &IPInstance) -> Result<bool, IpamError> {
        let ip = instance_ip(instance)?;
        let pool = self.pool(&instance.spec.subnet)?;
        let mut guard = pool.lock().map_err(|_| lock_poisoned(&instance.spec.subnet))?;
        if guard.owner_of(&ip) != Some(holder_of(instance).as_str()) {
            return Ok(false);
        }
        Ok(guard.release(&ip))
    }

    /// Number of used addresses in a subnet.
    pub fn used_count(&self, subnet: &str) -> Result<usize, IpamError> {
        let pool = self.pool(subnet)?;
        let count = pool.lock().map_err(|_| lock_poisoned(subnet))?.used_count();
        Ok(count)
    }

    fn pool(&self, name: &str) -> Result<SharedPool, IpamError> {
        self.subnets
            .read()
            .map_err(|_| lock_poisoned("subnets"))?
            .get(name)
            .cloned()
            .ok_or_else(|| IpamError::SubnetNotFound(name.to_string()))
    }

    /// Candidate pools of `network` for `version`, honouring an optional hint.
    fn candidates(&self, network: &str, version: IPVersion, hint: Option<&str>) -> Result<Vec<SharedPool>, IpamError> {
        let subnets = self.subnets.read().map_err(|_| lock_poisoned("subnets"))?;

        if let Some(hint) = hint {
            let pool = subnets
                .get(hint)
                .cloned()
                .ok_or_else(|| IpamError::SubnetNotFound(hint.to_string()))?;
            {
                let guard = pool.lock().map_err(|_| lock_poisoned(hint))?;
                if guard.network() != network || guard.version() != version {
                    return Err(IpamError::SubnetNotFound(format!(
                        "{hint} is not an IPv{version} subnet of network {network}"
                    )));
                }
            }
            return Ok(vec![pool]);
        }

        let mut in_network = false;
        let mut pools = Vec::new();
        for (name, pool) in subnets.iter() {
            let guard = pool.lock().map_err(|_| lock_poisoned(name))?;
            if guard.network() == network {
                in_network = true;
                if guard.version() == version {
                    pools.push(Arc::clone(pool));
                }
            }
        }
        if !in_network {
            return Err(IpamError::NetworkNotFound(network.to_string()));
        }
        Ok(pools)
    }

    fn allocate_version(
        &self,
        network: &str,
        version: IPVersion,
        hint: Option<&str>,
        holder: &str,
    ) -> Result<AllocatedIP, IpamError> {
        for pool in self.candidates(network, version, hint)? {
            let mut guard = pool.lock().map_err(|_| lock_poisoned(network))?;
            if let Some(ip) = guard.allocate(holder) {
                return Ok(ip);
            }
            debug!("Subnet {} exhausted", guard.name());
        }
        Err(IpamError::NoAvailableIP {
            network: network.to_string(),
            version,
        })
    }

    fn find_pool_for(&self, network: &str, ip: &IpAddr, hint: Option<&str>) -> Result<SharedPool, IpamError> {
        let version = IPVersion::of(ip);
        for pool in self.candidates(network, version, hint)? {
            if pool.lock().map_err(|_| lock_poisoned(network))?.contains(ip) {
                return Ok(pool);
            }
        }
        Err(IpamError::NotAssignable {
            ip: ip.to_string(),
            network: network.to_string(),
        })
    }

    /// Undo for a partially applied multi-family call.
    fn rollback(&self, applied: &[AllocatedIP]) {
        for ip in applied {
            match self.pool(&ip.subnet) {
                Ok(pool) => {
                    if let Ok(mut guard) = pool.lock() {
                        guard.release(&ip.ip());
                    }
                }
                Err(e) => warn!("Rollback of {} failed: {}", ip, e),
            }
        }
    }
}

fn hint_at(subnets: &[String], index: usize) -> Option<&str> {
    subnets
        .get(index)
        .map(String::as_str)
        .filter(|name| !name.is_empty())
}

#[async_trait::async_trait]
impl IpamManager for SubnetAllocator {
    async fn allocate(
        &self,
        family: IpFamilyMode,
        network: &str,
        subnets: &[String],
        pod_name: &str,
        pod_namespace: &str,
    ) -> Result<Vec<AllocatedIP>, IpamError> {
        let holder = owner(pod_name, pod_namespace);
        let mut allocated = Vec::with_capacity(family.expected_count());

        for (index, version) in family.versions().iter().enumerate() {
            match self.allocate_version(network, *version, hint_at(subnets, index), &holder) {
                Ok(ip) => allocated.push(ip),
                Err(e) => {
                    self.rollback(&allocated);
                    return Err(e);
                }
            }
        }

        debug!("Allocated {:?} for {}", allocated.iter().map(ToString::to_string).collect::<Vec<_>>(), holder);
        Ok(allocated)
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
        if candidates.len() != family.expected_count() {
            return Err(IpamError::FamilyMismatch(format!(
                "{family} needs {} address(es), got {}",
                family.expected_count(),
                candidates.len()
            )));
        }

        let holder = owner(pod_name, pod_namespace);
        let mut assigned = Vec::with_capacity(candidates.len());
        let mut newly_used = Vec::new();

        for (index, (candidate, version)) in candidates.iter().zip(family.versions()).enumerate() {
            let result = candidate
                .parse::<IpAddr>()
                .map_err(|_| IpamError::InvalidIP(candidate.clone()))
                .and_then(|ip| {
                    if IPVersion::of(&ip) == *version {
                        Ok(ip)
                    } else {
                        Err(IpamError::FamilyMismatch(format!("{ip} is not IPv{version}")))
                    }
                })
                .and_then(|ip| {
                    let pool = self.find_pool_for(network, &ip, hint_at(subnets, index))?;
                    let mut guard = pool.lock().map_err(|_| lock_poisoned(network))?;
                    guard.assign(ip, &holder, forced)
                });

            match result {
                Ok((ip, newly)) => {
                    if newly {
                        newly_used.push(ip.clone());
                    }
                    assigned.push(ip);
                }
                Err(e) => {
                    self.rollback(&newly_used);
                    return Err(e);
                }
            }
        }

        Ok(Assignment {
            ips: assigned,
            newly_used,
        })
    }

    async fn release(&self, network: &str, subnets: &[String], ips: &[String]) -> Result<(), IpamError> {
        for (index, raw) in ips.iter().enumerate() {
            let ip: IpAddr = raw.parse().map_err(|_| IpamError::InvalidIP(raw.clone()))?;
            let pool = match hint_at(subnets, index) {
                Some(subnet) => self.pool(subnet)?,
                None => self.find_pool_for(network, &ip, None)?,
            };
            let released = pool.lock().map_err(|_| lock_poisoned(network))?.release(&ip);
            debug!("Released {} in network {} (was used: {})", ip, network, released);
        }
        Ok(())
    }
}
