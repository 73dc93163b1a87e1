//! PodNet CRD Definitions
//!
//! Kubernetes Custom Resource Definitions shared by the pod IPAM controller
//! and the node daemon.

pub mod constants;
pub mod ip_instance;
pub mod network;
pub mod subnet;

pub use ip_instance::*;
pub use network::*;
pub use subnet::*;
