//! PodNet node daemon
//!
//! Serves the container runtime's network plugin over a local unix socket.
//! For every sandbox it waits until the pod's IPInstance bindings, written
//! by the cluster-level pod IPAM controller, are visible, validates them,
//! configures the interface and records which sandbox now uses them.
//!
//! Endpoints:
//! - `POST /api/v1/add` / `POST /api/v1/del`: interface add and teardown
//! - `POST /api/v1/ipam/add` / `POST /api/v1/ipam/del`: address-only form
//!
//! Address release is never driven from here; the controller decouples
//! bindings when the pod goes away.

pub mod cluster;
pub mod config;
pub mod error;
pub mod handler;
pub mod nic;
pub mod request;
pub mod server;
pub mod waiter;

#[cfg(test)]
mod test_utils;

pub use cluster::{BindingQuery, BindingStatus, ClusterApi, KubeClusterApi};
pub use config::Config;
pub use error::DaemonError;
pub use handler::Daemon;
pub use nic::{DryRunNic, NicAddress, NicConfigurator, NicRequest, host_interface_name};
pub use request::{ErrorResponse, IPAddress, PodIPAMRequest, PodIPAMResponse, PodRequest, PodResponse};
pub use server::{router, serve};
pub use waiter::{BindingWaiter, PollingWaiter};
