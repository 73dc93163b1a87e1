//! Free/used state of a single subnet.

use crate::error::IpamError;
use crate::types::AllocatedIP;
use crds::{IPVersion, Subnet};
use ipnet::IpNet;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// One subnet's address space.
///
/// Addresses are tracked as `u128` offsets so both families share one code
/// path. Allocation walks forward from the last handed-out address so a
/// just-released address is not immediately reused.
#[derive(Debug, Clone)]
pub struct SubnetPool {
    name: String,
    network: String,
    cidr: IpNet,
    gateway: Option<IpAddr>,
    net_id: Option<i32>,
    start: u128,
    end: u128,
    reserved: BTreeSet<IpAddr>,
    excluded: BTreeSet<IpAddr>,
    /// address → `namespace/name` of the holder
    used: BTreeMap<IpAddr, String>,
    cursor: Option<u128>,
}

fn to_u128(ip: IpAddr) -> u128 {
    match ip {
        IpAddr::V4(v4) => u128::from(u32::from(v4)),
        IpAddr::V6(v6) => u128::from(v6),
    }
}

fn from_u128(version: IPVersion, value: u128) -> IpAddr {
    match version {
        // Offsets of a v4 pool never exceed u32::MAX.
        IPVersion::V4 => IpAddr::V4(Ipv4Addr::from(u32::try_from(value).unwrap_or(u32::MAX))),
        IPVersion::V6 => IpAddr::V6(Ipv6Addr::from(value)),
    }
}

fn parse_ip(subnet: &str, value: &str) -> Result<IpAddr, IpamError> {
    value.trim().parse().map_err(|_| IpamError::InvalidSubnet {
        name: subnet.to_string(),
        reason: format!("invalid address {value:?}"),
    })
}

impl SubnetPool {
    /// Builds a pool from a Subnet resource. `network_net_id` is inherited
    /// when the subnet has no own net ID.
    pub fn from_subnet(subnet: &Subnet, network_net_id: Option<i32>) -> Result<Self, IpamError> {
        let name = subnet.metadata.name.clone().unwrap_or_default();
        let range = &subnet.spec.range;
        let invalid = |reason: String| IpamError::InvalidSubnet { name: name.clone(), reason };

        let cidr: IpNet = range
            .cidr
            .parse()
            .map_err(|_| invalid(format!("invalid cidr {:?}", range.cidr)))?;
        let cidr = cidr.trunc();
        let version = IPVersion::of(&cidr.addr());
        if version != range.version {
            return Err(invalid(format!("cidr {cidr} is not IPv{}", range.version)));
        }

        let network_addr = to_u128(cidr.network());
        let broadcast = to_u128(cidr.broadcast());
        let (default_start, default_end) = match (version, cidr.prefix_len()) {
            (IPVersion::V4, len) if len >= 31 => (network_addr, broadcast),
            (IPVersion::V4, _) => (network_addr + 1, broadcast - 1),
            (IPVersion::V6, 128) => (network_addr, broadcast),
            (IPVersion::V6, _) => (network_addr + 1, broadcast),
        };

        let bound = |value: &Option<String>, default: u128| -> Result<u128, IpamError> {
            match value {
                None => Ok(default),
                Some(raw) => {
                    let ip = parse_ip(&name, raw)?;
                    if !cidr.contains(&ip) {
                        return Err(invalid(format!("{ip} is outside {cidr}")));
                    }
                    Ok(to_u128(ip))
                }
            }
        };
        let start = bound(&range.start, default_start)?;
        let end = bound(&range.end, default_end)?;
        if start > end {
            return Err(invalid("range start is after range end".to_string()));
        }

        let gateway = range
            .gateway
            .as_deref()
            .map(|gw| parse_ip(&name, gw))
            .transpose()?;
        let reserved = range
            .reserved_ips
            .iter()
            .map(|ip| parse_ip(&name, ip))
            .collect::<Result<_, _>>()?;
        let excluded = range
            .exclude_ips
            .iter()
            .map(|ip| parse_ip(&name, ip))
            .collect::<Result<_, _>>()?;

        Ok(Self {
            name: name.clone(),
            network: subnet.spec.network.clone(),
            cidr,
            gateway,
            net_id: subnet.spec.net_id.or(network_net_id),
            start,
            end,
            reserved,
            excluded,
            used: BTreeMap::new(),
            cursor: None,
        })
    }

    /// Subnet name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Owning network.
    #[must_use]
    pub fn network(&self) -> &str {
        &self.network
    }

    /// IP version of the subnet.
    #[must_use]
    pub fn version(&self) -> IPVersion {
        IPVersion::of(&self.cidr.addr())
    }

    /// Whether `ip` lies inside the subnet's CIDR.
    #[must_use]
    pub fn contains(&self, ip: &IpAddr) -> bool {
        self.cidr.contains(ip)
    }

    /// Number of addresses currently held.
    #[must_use]
    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    /// Holder of `ip`, if any.
    #[must_use]
    pub fn owner_of(&self, ip: &IpAddr) -> Option<&str> {
        self.used.get(ip).map(String::as_str)
    }

    fn is_free(&self, ip: &IpAddr) -> bool {
        Some(*ip) != self.gateway
            && !self.reserved.contains(ip)
            && !self.excluded.contains(ip)
            && !self.used.contains_key(ip)
    }

    fn record(&self, ip: IpAddr) -> AllocatedIP {
        AllocatedIP {
            network: self.network.clone(),
            subnet: self.name.clone(),
            address: IpNet::new(ip, self.cidr.prefix_len()).unwrap_or(self.cidr),
            gateway: self.gateway,
            net_id: self.net_id,
        }
    }

    /// Hands out the next free address, or `None` when exhausted.
    pub fn allocate(&mut self, owner: &str) -> Option<AllocatedIP> {
        let version = self.version();
        let size = self.end - self.start;
        let first = match self.cursor {
            Some(last) if last >= self.start && last < self.end => last + 1,
            _ => self.start,
        };

        let mut offset: u128 = 0;
        loop {
            let candidate = self.start + (first - self.start + offset) % size.saturating_add(1);
            let ip = from_u128(version, candidate);
            if self.is_free(&ip) {
                self.used.insert(ip, owner.to_string());
                self.cursor = Some(candidate);
                return Some(self.record(ip));
            }
            if offset == size {
                return None;
            }
            offset += 1;
        }
    }

    /// Binds a specific address.
    ///
    /// Reserved addresses are only handed out this way. Without `forced`, an
    /// address held by a different owner is rejected. Returns the record and
    /// whether the address was newly marked used.
    pub fn assign(&mut self, ip: IpAddr, owner: &str, forced: bool) -> Result<(AllocatedIP, bool), IpamError> {
        let value = to_u128(ip);
        if !self.contains(&ip)
            || self.excluded.contains(&ip)
            || Some(ip) == self.gateway
            || value < self.start
            || value > self.end
        {
            return Err(IpamError::NotAssignable {
                ip: ip.to_string(),
                network: self.network.clone(),
            });
        }

        let newly_used = match self.used.get(&ip) {
            Some(holder) if holder != owner && !forced => {
                return Err(IpamError::IPInUse {
                    ip: ip.to_string(),
                    owner: holder.clone(),
                });
            }
            Some(_) => false,
            None => true,
        };

        self.used.insert(ip, owner.to_string());
        Ok((self.record(ip), newly_used))
    }

    /// Frees an address. Freeing an unknown address is a no-op.
    pub fn release(&mut self, ip: &IpAddr) -> bool {
        self.used.remove(ip).is_some()
    }

    /// Rebuilds the pool from a changed definition, keeping usage.
    ///
    /// The cursor survives only while it still lies inside the new range.
    pub fn update_from(&mut self, other: SubnetPool) {
        let used = std::mem::take(&mut self.used);
        let cursor = self.cursor;
        *self = other;
        self.used = used;
        self.cursor = cursor.filter(|last| (self.start..=self.end).contains(last));
    }
}
