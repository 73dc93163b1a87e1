//! Mock engine and store for unit testing
//!
//! - `manager.rs` - recording [`IpamManager`](crate::IpamManager) backed by a real in-memory engine
//! - `store.rs` - recording in-memory [`IpamStore`](crate::IpamStore)
//!
//! Both record every call and can be told to fail, so reconcilers can be
//! tested without a cluster.

mod manager;
mod store;

pub use manager::{ManagerCall, MockIpamManager};
pub use store::{MockBinding, MockIpamStore, StoreCall};
