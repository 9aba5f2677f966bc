use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RegistratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
            Self::Sctp => "sctp",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = RegistratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            "sctp" => Ok(Self::Sctp),
            other => Err(RegistratorError::Inspection(format!(
                "unknown protocol '{other}'"
            ))),
        }
    }
}

/// A port declared by the workload image, e.g. `80/tcp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExposedPort {
    pub port: u16,
    pub protocol: Protocol,
}

impl ExposedPort {
    pub fn new(port: u16, protocol: Protocol) -> Self {
        Self { port, protocol }
    }
}

impl FromStr for ExposedPort {
    type Err = RegistratorError;

    /// Parses the runtime's `<port>[/<protocol>]` notation; the protocol defaults to tcp.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (port, protocol) = match s.split_once('/') {
            Some((port, protocol)) => (port, protocol.parse()?),
            None => (s, Protocol::Tcp),
        };
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| RegistratorError::Inspection(format!("invalid port '{s}': {e}")))?;
        Ok(Self { port, protocol })
    }
}

/// A runtime-assigned mapping from a container port to a host endpoint.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    pub container_port: u16,
    pub protocol: Protocol,
    pub host_address: String,
    pub host_port: u16,
}

/// Snapshot of a workload as reported by one inspection of the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadFacts {
    pub id: String,
    pub name: String,
    pub running: bool,
    /// `KEY=VALUE` entries in declaration order.
    pub environment: Vec<String>,
    pub exposed_ports: BTreeSet<ExposedPort>,
    pub port_bindings: BTreeSet<PortBinding>,
    /// Network name to the workload's IPv4 address on that network.
    pub network_addresses: BTreeMap<String, Ipv4Addr>,
}

impl WorkloadFacts {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            running: false,
            environment: Vec::new(),
            exposed_ports: BTreeSet::new(),
            port_bindings: BTreeSet::new(),
            network_addresses: BTreeMap::new(),
        }
    }

    /// Runtime name turned into a service name: `/myapp_web_1` becomes `myapp-web`.
    pub fn normalized_name(&self) -> String {
        normalize_name(&self.name)
    }
}

pub fn normalize_name(raw: &str) -> String {
    let name = raw.strip_prefix('/').unwrap_or(raw);
    let name = match name.rsplit_once('_') {
        Some((base, replica))
            if !base.is_empty()
                && !replica.is_empty()
                && replica.bytes().all(|b| b.is_ascii_digit()) =>
        {
            base
        }
        _ => name,
    };
    name.replace('_', "-")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_exposed_port_with_protocol() {
        let port: ExposedPort = "53/udp".parse().unwrap();
        assert_eq!(port, ExposedPort::new(53, Protocol::Udp));
    }

    #[test]
    fn parse_exposed_port_defaults_to_tcp() {
        let port: ExposedPort = "8080".parse().unwrap();
        assert_eq!(port, ExposedPort::new(8080, Protocol::Tcp));
    }

    #[test]
    fn parse_exposed_port_rejects_garbage() {
        assert!("http/tcp".parse::<ExposedPort>().is_err());
        assert!("80/quic".parse::<ExposedPort>().is_err());
    }

    #[test]
    fn normalize_strips_slash_and_replica_suffix() {
        assert_eq!(normalize_name("/myapp_web_1"), "myapp-web");
        assert_eq!(normalize_name("/c1"), "c1");
        assert_eq!(normalize_name("redis"), "redis");
    }

    #[test]
    fn normalize_keeps_non_numeric_suffix() {
        assert_eq!(normalize_name("/my_app_v2"), "my-app-v2");
        assert_eq!(normalize_name("/_1"), "-1");
    }
}
