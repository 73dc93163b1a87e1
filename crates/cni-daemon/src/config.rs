//! Daemon configuration from environment variables.

use crate::error::DaemonError;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings of the node daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Node this daemon serves
    pub node_name: String,
    /// Unix socket the handshake API listens on
    pub socket_path: PathBuf,
    /// Mirror pod addresses into `cni.projectcalico.org/podIPs`
    pub patch_calico_pod_ips: bool,
    /// Honour IP family hints when the admission layer has not finalized them
    pub dual_stack: bool,
    /// First wait before listing bindings
    pub poll_base: Duration,
    /// Binding list attempts before giving up
    pub poll_retries: u32,
}

impl Config {
    /// Loads the configuration from the process environment.
    pub fn from_env() -> Result<Self, DaemonError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads the configuration through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DaemonError> {
        let node_name = lookup("NODE_NAME")
            .filter(|name| !name.is_empty())
            .ok_or_else(|| DaemonError::InvalidConfig("NODE_NAME must be set".to_string()))?;

        let socket_path = lookup("DAEMON_SOCKET_PATH")
            .filter(|path| !path.is_empty())
            .unwrap_or_else(|| "/var/run/podnet/cni-daemon.sock".to_string())
            .into();

        let poll_base = Duration::from_millis(parse_number(&lookup, "BINDING_POLL_BASE_MS", 5)?);
        let poll_retries = u32::try_from(parse_number(&lookup, "BINDING_POLL_RETRIES", 11)?)
            .ok()
            .filter(|n| *n > 0)
            .ok_or_else(|| DaemonError::InvalidConfig("BINDING_POLL_RETRIES must be between 1 and u32::MAX".to_string()))?;

        Ok(Self {
            node_name,
            socket_path,
            patch_calico_pod_ips: parse_flag(&lookup, "PATCH_CALICO_POD_IPS", false)?,
            dual_stack: parse_flag(&lookup, "DUAL_STACK", false)?,
            poll_base,
            poll_retries,
        })
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Result<u64, DaemonError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| DaemonError::InvalidConfig(format!("{key} must be a non-negative integer, got {raw:?}"))),
    }
}

fn parse_flag(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: bool) -> Result<bool, DaemonError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(DaemonError::InvalidConfig(format!("{key} must be true or false, got {raw:?}"))),
        },
    }
}
