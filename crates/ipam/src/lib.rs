//! Pod IPAM
//!
//! Contracts and building blocks for pod address management on Kubernetes:
//! the allocation engine ([`IpamManager`]), the binding store ([`IpamStore`]),
//! and the typed [`PodNetworkIntent`] parsed from pod annotations and labels.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ipam::{IpFamilyMode, IpamManager, KubeIpamStore, SubnetAllocator};
//!
//! # async fn example(client: kube::Client) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Arc::new(SubnetAllocator::new());
//! let store = KubeIpamStore::new(client, engine.clone());
//!
//! let ips = engine
//!     .allocate(IpFamilyMode::IPv4, "overlay", &[], "web-0", "default")
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! - **Dual-stack**: one IPv4 and one IPv6 address per pod, all or nothing
//! - **Per-subnet locking**: allocations in different subnets never contend
//! - **Durable bindings**: one `IPInstance` object per bound address

pub mod allocator;
pub mod backoff;
pub mod error;
pub mod intent;
pub mod kube_store;
pub mod pod;
pub mod pool;
pub mod types;
#[path = "trait.rs"]
pub mod ipam_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

#[cfg(test)]
mod allocator_test;
#[cfg(test)]
mod test_utils;

pub use allocator::SubnetAllocator;
pub use backoff::{ConflictBackoff, is_kube_conflict, retry_on_conflict};
pub use error::IpamError;
pub use intent::{Hint, PodNetworkIntent, Retention};
pub use ipam_trait::{IpamManager, IpamStore};
pub use kube_store::{KubeIpamStore, allocated_ip_from_instance, generate_mac};
pub use pool::SubnetPool;
pub use types::{AllocatedIP, Assignment, IpFamilyMode, normalize_ip, squash_ips, squash_subnets};
#[cfg(any(test, feature = "test-util"))]
pub use mock::{ManagerCall, MockBinding, MockIpamManager, MockIpamStore, StoreCall};
