//! Well-known annotation, label and finalizer keys.
//!
//! Annotations and labels that express pod intent share the same key, so a
//! value can be supplied either way (annotation wins).

/// API group shared by every PodNet resource.
pub const GROUP: &str = "podnet.microscaler.io";

/// Address-assigned marker. Written together with the coupling step and used
/// as the fence against duplicate allocation.
pub const ANNOTATION_IP: &str = "podnet.microscaler.io/ip";

/// Explicit network name.
pub const ANNOTATION_SPECIFIED_NETWORK: &str = "podnet.microscaler.io/specified-network";
/// Explicit network name (label form).
pub const LABEL_SPECIFIED_NETWORK: &str = "podnet.microscaler.io/specified-network";

/// Explicit subnet name; `v4/v6` in dual-stack mode.
pub const ANNOTATION_SPECIFIED_SUBNET: &str = "podnet.microscaler.io/specified-subnet";
/// Explicit subnet name (label form).
pub const LABEL_SPECIFIED_SUBNET: &str = "podnet.microscaler.io/specified-subnet";

/// Network type hint (`Underlay`, `Overlay`, `GlobalBGP`).
pub const ANNOTATION_NETWORK_TYPE: &str = "podnet.microscaler.io/network-type";
/// Network type hint (label form).
pub const LABEL_NETWORK_TYPE: &str = "podnet.microscaler.io/network-type";

/// IP family hint (`IPv4`, `IPv6`, `DualStack`).
pub const ANNOTATION_IP_FAMILY: &str = "podnet.microscaler.io/ip-family";
/// IP family hint (label form).
pub const LABEL_IP_FAMILY: &str = "podnet.microscaler.io/ip-family";

/// Ordered pre-assigned addresses for ordinal workloads.
pub const ANNOTATION_IP_POOL: &str = "podnet.microscaler.io/ip-pool";

/// Per-pod retention override (`true` / `false`).
pub const ANNOTATION_IP_RETAIN: &str = "podnet.microscaler.io/ip-retain";

/// Set by the admission layer once the IP family annotation is final.
pub const ANNOTATION_HANDLED_BY_WEBHOOK: &str = "podnet.microscaler.io/handled-by-webhook";

/// Calico-compatible pod IP list.
pub const ANNOTATION_CALICO_POD_IPS: &str = "cni.projectcalico.org/podIPs";

/// Finalizer held by stateful pods until their addresses are reserved.
pub const FINALIZER_IP_ALLOCATED: &str = "podnet.microscaler.io/ip-allocated";

/// Node an IPInstance is bound to.
pub const LABEL_NODE: &str = "podnet.microscaler.io/node";
/// UID of the pod incarnation an IPInstance is bound to.
pub const LABEL_POD_UID: &str = "podnet.microscaler.io/pod-uid";
/// Name of the pod an IPInstance belongs to. Survives pod recreation.
pub const LABEL_POD_NAME: &str = "podnet.microscaler.io/pod-name";
/// Pod interface an IPInstance is configured on.
pub const LABEL_INTERFACE_NAME: &str = "podnet.microscaler.io/interface-name";
/// Network of an IPInstance.
pub const LABEL_NETWORK: &str = "podnet.microscaler.io/network";
/// Subnet of an IPInstance.
pub const LABEL_SUBNET: &str = "podnet.microscaler.io/subnet";

/// Interface every reconciler-managed binding targets.
pub const DEFAULT_INTERFACE_NAME: &str = "eth0";
