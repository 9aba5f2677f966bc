//! Consul agent HTTP API as the service registry.
//!
//! - `PUT /v1/agent/service/register` upserts a service keyed on its `ID`.
//! - `PUT /v1/agent/service/deregister/{id}` removes one; a 404 means it is already gone.
//! - `GET /v1/agent/services` lists everything registered on the local agent.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{RegistratorError, Result};
use crate::models::{HealthCheck, RegistratorConfig, ServiceDefinition};

use super::registry::Registry;

const TOKEN_HEADER: &str = "X-Consul-Token";

pub struct ConsulRegistry {
    http: Client,
    base_url: String,
    token: Option<String>,
    self_id: String,
}

impl ConsulRegistry {
    pub fn new(config: &RegistratorConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.call_timeout())
            .build()
            .map_err(|e| RegistratorError::Registry(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url(&config.registry_endpoint)?,
            token: config.registry_token.clone(),
            self_id: config.registry_self_id.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{path}", self.base_url)
    }
}

#[async_trait]
impl Registry for ConsulRegistry {
    async fn register(&self, service: &ServiceDefinition) -> Result<()> {
        let payload = ServicePayload::from(service);
        let response = self
            .request(self.http.put(self.url("/agent/service/register")))
            .json(&payload)
            .send()
            .await
            .map_err(|e| RegistratorError::Registry(format!("register {}: {e}", service.id)))?;
        expect_success(response, &format!("register {}", service.id)).await
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        let url = service_url(&self.url("/agent/service/deregister"), service_id)?;
        let response = self
            .request(self.http.put(url))
            .send()
            .await
            .map_err(|e| RegistratorError::Registry(format!("deregister {service_id}: {e}")))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        expect_success(response, &format!("deregister {service_id}")).await
    }

    async fn list_service_ids(&self) -> Result<Vec<String>> {
        let response = self
            .request(self.http.get(self.url("/agent/services")))
            .send()
            .await
            .map_err(|e| RegistratorError::Registry(format!("list services: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistratorError::Registry(format!(
                "list services failed (status={status}): {body}"
            )));
        }
        let services: HashMap<String, Value> = response.json().await?;
        let mut ids: Vec<String> = services.into_keys().collect();
        ids.sort();
        Ok(ids)
    }

    fn self_id(&self) -> &str {
        &self.self_id
    }
}

async fn expect_success(response: Response, operation: &str) -> Result<()> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(RegistratorError::Registry(format!(
        "{operation} failed (status={status}): {}",
        body.trim()
    )))
}

/// Accepts `host:port` or a full URL and returns the URL without a trailing slash.
pub fn base_url(endpoint: &str) -> Result<String> {
    let endpoint = endpoint.trim().trim_end_matches('/');
    if endpoint.is_empty() {
        return Err(RegistratorError::InvalidConfig(
            "registry endpoint is required".into(),
        ));
    }
    let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    };
    reqwest::Url::parse(&url).map_err(|e| {
        RegistratorError::InvalidConfig(format!("invalid registry endpoint '{endpoint}': {e}"))
    })?;
    Ok(url)
}

/// `collection` with `service_id` appended as one percent-encoded path segment.
fn service_url(collection: &str, service_id: &str) -> Result<Url> {
    let mut url = Url::parse(collection).map_err(|e| {
        RegistratorError::InvalidConfig(format!("invalid registry url '{collection}': {e}"))
    })?;
    url.path_segments_mut()
        .map_err(|()| {
            RegistratorError::InvalidConfig(format!("registry url '{collection}' cannot be a base"))
        })?
        .push(service_id);
    Ok(url)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ServicePayload {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tags: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    checks: Vec<Map<String, Value>>,
}

impl From<&ServiceDefinition> for ServicePayload {
    fn from(service: &ServiceDefinition) -> Self {
        Self {
            id: service.id.clone(),
            name: service.name.clone(),
            tags: service.tags.clone(),
            address: service.address.clone(),
            port: service.port,
            checks: service.checks.iter().map(check_payload).collect(),
        }
    }
}

fn check_payload(check: &HealthCheck) -> Map<String, Value> {
    let mut payload = Map::new();
    for (field, value) in check.fields() {
        let value = match field {
            "script" => Value::Array(vec!["/bin/sh".into(), "-c".into(), value.into()]),
            "tls_skip_verify" | "grpc_use_tls" => Value::Bool(matches!(
                value.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes"
            )),
            _ => Value::String(value.to_string()),
        };
        payload.insert(wire_field(field), value);
    }
    payload
}

/// Maps a lower-cased annotation field to the agent API's check field name.
fn wire_field(field: &str) -> String {
    let known = match field {
        "id" => Some("CheckID"),
        "script" => Some("Args"),
        "http" => Some("HTTP"),
        "tcp" => Some("TCP"),
        "udp" => Some("UDP"),
        "ttl" => Some("TTL"),
        "grpc" => Some("GRPC"),
        "grpc_use_tls" => Some("GRPCUseTLS"),
        "h2ping" => Some("H2PING"),
        "tls_skip_verify" => Some("TLSSkipVerify"),
        "tls_server_name" => Some("TLSServerName"),
        "docker_container_id" => Some("DockerContainerID"),
        _ => None,
    };
    if let Some(known) = known {
        return known.to_string();
    }
    field
        .split('_')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}
