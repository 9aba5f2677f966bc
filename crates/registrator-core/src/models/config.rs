use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RegistratorError;

pub const MIN_RESYNC_INTERVAL_SECONDS: u64 = 30;
pub const DEFAULT_RESYNC_INTERVAL_SECONDS: u64 = 3600;
pub const DEFAULT_MAX_CONCURRENCY: usize = 16;
pub const DEFAULT_CALL_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_REGISTRY_SELF_ID: &str = "consul";
pub const DEFAULT_DOCKER_BINARY: &str = "docker";

fn default_resync_interval_seconds() -> u64 {
    DEFAULT_RESYNC_INTERVAL_SECONDS
}

fn default_max_concurrency() -> usize {
    DEFAULT_MAX_CONCURRENCY
}

fn default_call_timeout_seconds() -> u64 {
    DEFAULT_CALL_TIMEOUT_SECONDS
}

fn default_registry_self_id() -> String {
    DEFAULT_REGISTRY_SELF_ID.to_string()
}

fn default_docker_binary() -> String {
    DEFAULT_DOCKER_BINARY.to_string()
}

/// Process-wide settings, fixed once the agent has started.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistratorConfig {
    /// Registry agent as `host:port` or a full URL.
    pub registry_endpoint: String,
    #[serde(default = "default_resync_interval_seconds")]
    pub resync_interval_seconds: u64,
    #[serde(default)]
    pub restrict_to_own_network: bool,
    #[serde(default)]
    pub port_bindings_only: bool,
    #[serde(default)]
    pub registry_token: Option<String>,
    /// Registry entry that belongs to the registry itself and is never reconciled.
    #[serde(default = "default_registry_self_id")]
    pub registry_self_id: String,
    #[serde(default = "default_docker_binary")]
    pub docker_binary: String,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,
    /// Host interface addresses, discovered at startup.
    #[serde(skip)]
    pub own_addresses: Vec<OwnAddress>,
}

impl RegistratorConfig {
    pub fn new(registry_endpoint: impl Into<String>) -> Self {
        Self {
            registry_endpoint: registry_endpoint.into(),
            resync_interval_seconds: DEFAULT_RESYNC_INTERVAL_SECONDS,
            restrict_to_own_network: false,
            port_bindings_only: false,
            registry_token: None,
            registry_self_id: default_registry_self_id(),
            docker_binary: default_docker_binary(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            call_timeout_seconds: DEFAULT_CALL_TIMEOUT_SECONDS,
            own_addresses: Vec::new(),
        }
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    /// Whether `ip` lies inside the subnet of any host interface.
    pub fn is_own_network(&self, ip: Ipv4Addr) -> bool {
        self.own_addresses.iter().any(|own| own.contains(ip))
    }
}

/// An interface address of this host together with its netmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnAddress {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
}

impl OwnAddress {
    pub fn new(address: Ipv4Addr, netmask: Ipv4Addr) -> Self {
        Self { address, netmask }
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let mask = u32::from(self.netmask);
        u32::from(self.address) & mask == u32::from(ip) & mask
    }

    pub fn prefix_len(&self) -> u32 {
        u32::from(self.netmask).count_ones()
    }
}

impl fmt::Display for OwnAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len())
    }
}

impl FromStr for OwnAddress {
    type Err = RegistratorError;

    /// Parses CIDR notation such as `10.0.0.5/24`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RegistratorError::InvalidConfig(format!("invalid address '{s}'"));
        let (address, prefix) = s.split_once('/').ok_or_else(invalid)?;
        let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
        let prefix: u32 = prefix.parse().map_err(|_| invalid())?;
        if prefix > 32 {
            return Err(invalid());
        }
        let mask = u32::MAX.checked_shl(32 - prefix).unwrap_or(0);
        Ok(Self::new(address, Ipv4Addr::from(mask)))
    }
}
