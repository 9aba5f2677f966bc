use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::workload::Protocol;

/// Separator between the segments of a service id. Runtime ids never contain it,
/// so the first segment of any id written by this agent is the workload id.
pub const SERVICE_ID_SEPARATOR: char = ':';

/// One health-check record: lower-cased field name to its substituted value.
///
/// Equality compares the whole field set, which is what duplicate detection needs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthCheck {
    fields: BTreeMap<String, String>,
}

impl HealthCheck {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(field, value);
        self
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub id: String,
    pub name: String,
    pub tags: Vec<String>,
    /// Empty when the registry should fall back to its own node address.
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    pub checks: Vec<HealthCheck>,
}

/// `<workload>:<name>[:<port>:<protocol>]`
pub fn service_id(workload_id: &str, name: &str, port: Option<(u16, Protocol)>) -> String {
    match port {
        Some((port, protocol)) => format!("{workload_id}:{name}:{port}:{protocol}"),
        None => format!("{workload_id}:{name}"),
    }
}

/// A service id found in the registry together with the workload it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegistryEntry {
    pub service_id: String,
    pub workload_id: String,
}

impl RegistryEntry {
    pub fn from_service_id(service_id: impl Into<String>) -> Self {
        let service_id = service_id.into();
        let workload_id = service_id
            .split(SERVICE_ID_SEPARATOR)
            .next()
            .unwrap_or_default()
            .to_string();
        Self {
            service_id,
            workload_id,
        }
    }
}
