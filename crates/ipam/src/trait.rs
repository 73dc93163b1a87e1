//! Allocation engine and binding store contracts.
//!
//! Both contracts take address lists. A single-stack call passes one
//! element, a dual-stack call passes one per family (IPv4 first); either
//! every element succeeds or the call fails as a whole.
//! All async methods must be `Send` to work with Tokio's work-stealing runtime.

use crate::error::IpamError;
use crate::types::{AllocatedIP, Assignment, IpFamilyMode};
use k8s_openapi::api::core::v1::Pod;

/// Owns the free/used state of every subnet.
///
/// Concurrent calls never hand out the same address twice for one subnet.
/// Calls against different subnets proceed independently.
#[async_trait::async_trait]
pub trait IpamManager: Send + Sync {
    /// Allocates one fresh address per requested family.
    ///
    /// `subnets` are optional per-family hints, aligned with
    /// [`IpFamilyMode::versions`].
    async fn allocate(
        &self,
        family: IpFamilyMode,
        network: &str,
        subnets: &[String],
        pod_name: &str,
        pod_namespace: &str,
    ) -> Result<Vec<AllocatedIP>, IpamError>;

    /// Binds specific addresses. With `forced`, addresses already marked
    /// used are taken over instead of rejected.
    ///
    /// [`Assignment::newly_used`] tells which addresses this call took from
    /// the free pool.
    #[allow(clippy::too_many_arguments)] // Mirrors the engine contract
    async fn assign(
        &self,
        family: IpFamilyMode,
        network: &str,
        subnets: &[String],
        candidates: &[String],
        pod_name: &str,
        pod_namespace: &str,
        forced: bool,
    ) -> Result<Assignment, IpamError>;

    /// Returns addresses to the free pool. Releasing a free address is a no-op.
    async fn release(&self, network: &str, subnets: &[String], ips: &[String]) -> Result<(), IpamError>;
}

/// Persists which pod holds which address.
#[async_trait::async_trait]
pub trait IpamStore: Send + Sync {
    /// Creates bindings and marks the pod as having an assigned address.
    ///
    /// All or nothing: on error no binding written by this call remains.
    async fn couple(&self, pod: &Pod, ips: &[AllocatedIP]) -> Result<(), IpamError>;

    /// Binds, overriding whatever soft state the addresses carry.
    ///
    /// On error, bindings this call created are removed and existing ones
    /// get their previous state back.
    async fn re_couple(&self, pod: &Pod, ips: &[AllocatedIP]) -> Result<(), IpamError>;

    /// Removes every binding of this pod incarnation. Idempotent.
    async fn de_couple(&self, pod: &Pod) -> Result<(), IpamError>;

    /// Keeps the bindings for the pod's identity without releasing them.
    async fn ip_reserve(&self, pod: &Pod) -> Result<(), IpamError>;

    /// Deletes one retained binding and frees its address.
    async fn ip_recycle(&self, namespace: &str, ip: &AllocatedIP) -> Result<(), IpamError>;

    /// Addresses bound to the pod's identity (name + namespace), IPv4 first.
    async fn allocated_ips(&self, pod: &Pod) -> Result<Vec<AllocatedIP>, IpamError>;
}
