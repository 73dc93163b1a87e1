//! Controller configuration from environment variables.

use crate::error::ControllerError;
use std::net::SocketAddr;

/// Runtime settings of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Restrict the Pod watch to one namespace
    pub watch_namespace: Option<String>,
    /// Pod events reconciled in parallel
    pub concurrency: u16,
    /// Cluster-wide retention default for stateful pods
    pub default_ip_retain: bool,
    /// Honour IP family hints and use the two-address engine/store calls
    pub dual_stack: bool,
    /// Listener for `/metrics`, `/healthz` and `/readyz`
    pub metrics_addr: SocketAddr,
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let watch_namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());

        let concurrency = match lookup("POD_IPAM_CONCURRENCY") {
            Some(raw) => raw.parse::<u16>().ok().filter(|n| *n > 0).ok_or_else(|| {
                ControllerError::InvalidConfig(format!("POD_IPAM_CONCURRENCY must be a positive integer, got {raw:?}"))
            })?,
            None => 8,
        };

        let default_ip_retain = parse_flag(&lookup, "DEFAULT_IP_RETAIN", true)?;
        let dual_stack = parse_flag(&lookup, "DUAL_STACK", false)?;

        let metrics_addr = lookup("METRICS_ADDR")
            .unwrap_or_else(|| "0.0.0.0:9090".to_string());
        let metrics_addr = metrics_addr.parse().map_err(|_| {
            ControllerError::InvalidConfig(format!("METRICS_ADDR is not a socket address: {metrics_addr:?}"))
        })?;

        Ok(Self {
            watch_namespace,
            concurrency,
            default_ip_retain,
            dual_stack,
            metrics_addr,
        })
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool, ControllerError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(ControllerError::InvalidConfig(format!("{key} must be true or false, got {raw:?}"))),
        },
    }
}
