use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::Ipv4Addr;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::error::{RegistratorError, Result};
use crate::models::{ExposedPort, PortBinding, WorkloadEvent, WorkloadFacts};

use super::runtime::WorkloadSource;

const EVENT_BUFFER: usize = 256;

/// Docker driven through its command-line client.
pub struct DockerCli {
    binary: String,
}

impl DockerCli {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run_docker(&self, args: &[&str]) -> Result<String> {
        // A timed-out call drops this future; the child must not outlive it.
        let output = Command::new(&self.binary)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                RegistratorError::Inspection(format!("failed to run {}: {e}", self.binary))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RegistratorError::Inspection(format!(
                "{} {} failed (exit {}): {}",
                self.binary,
                args.join(" "),
                output.status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl WorkloadSource for DockerCli {
    async fn list_running(&self) -> Result<Vec<String>> {
        let output = self.run_docker(&["ps", "--no-trunc", "--quiet"]).await?;
        Ok(output
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<WorkloadFacts> {
        match self.run_docker(&["inspect", "--type", "container", id]).await {
            Ok(json) => parse_inspect(&json),
            Err(RegistratorError::Inspection(message)) if is_missing(&message) => {
                Err(RegistratorError::WorkloadNotFound(id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn stream_events(&self) -> Result<mpsc::Receiver<WorkloadEvent>> {
        let mut child = Command::new(&self.binary)
            .args([
                "events",
                "--filter",
                "type=container",
                "--format",
                "{{json .}}",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RegistratorError::Stream(format!("failed to spawn {} events: {e}", self.binary))
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| RegistratorError::Stream("event stream has no stdout".into()))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => match parse_event(&line) {
                        Some(event) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        None => debug!(line = %line, "skipping unparseable event"),
                    },
                    Ok(None) => break,
                    Err(e) => {
                        error!(error = %e, "failed to read event stream");
                        break;
                    }
                }
            }
            match child.wait().await {
                Ok(status) => warn!(%status, "docker events exited"),
                Err(e) => error!(error = %e, "failed to reap docker events"),
            }
        });

        Ok(rx)
    }

    async fn ping(&self) -> Result<String> {
        self.run_docker(&["version", "--format", "{{.Server.Version}}"])
            .await
    }
}

fn is_missing(message: &str) -> bool {
    message.contains("No such container") || message.contains("No such object")
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    id: String,
    #[serde(default)]
    name: String,
    state: InspectState,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    network_settings: InspectNetworkSettings,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    env: Option<Vec<String>>,
    #[serde(default)]
    exposed_ports: Option<HashMap<String, serde_json::Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetworkSettings {
    #[serde(default)]
    ports: Option<HashMap<String, Option<Vec<InspectBinding>>>>,
    #[serde(default)]
    networks: Option<HashMap<String, InspectNetwork>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectBinding {
    #[serde(default)]
    host_ip: Option<String>,
    #[serde(default)]
    host_port: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress", default)]
    ip_address: Option<String>,
}

/// Converts `docker inspect` output (a one-element JSON array) into facts.
pub fn parse_inspect(json: &str) -> Result<WorkloadFacts> {
    let records: Vec<InspectRecord> = serde_json::from_str(json)?;
    let record = records
        .into_iter()
        .next()
        .ok_or_else(|| RegistratorError::Inspection("empty inspect output".into()))?;
    Ok(into_facts(record))
}

fn into_facts(record: InspectRecord) -> WorkloadFacts {
    let mut exposed_ports = BTreeSet::new();
    for key in record.config.exposed_ports.unwrap_or_default().keys() {
        match key.parse::<ExposedPort>() {
            Ok(port) => {
                exposed_ports.insert(port);
            }
            Err(e) => debug!(workload = %record.id, error = %e, "skipping exposed port"),
        }
    }

    let mut port_bindings = BTreeSet::new();
    for (key, bindings) in record.network_settings.ports.unwrap_or_default() {
        let Ok(container) = key.parse::<ExposedPort>() else {
            continue;
        };
        for binding in bindings.unwrap_or_default() {
            let (Some(host_address), Some(host_port)) = (binding.host_ip, binding.host_port)
            else {
                continue;
            };
            let Ok(host_port) = host_port.parse::<u16>() else {
                continue;
            };
            port_bindings.insert(PortBinding {
                container_port: container.port,
                protocol: container.protocol,
                host_address,
                host_port,
            });
        }
    }

    let mut network_addresses = BTreeMap::new();
    for (network, settings) in record.network_settings.networks.unwrap_or_default() {
        let Some(ip) = settings.ip_address.filter(|ip| !ip.is_empty()) else {
            continue;
        };
        match ip.parse::<Ipv4Addr>() {
            Ok(ip) => {
                network_addresses.insert(network, ip);
            }
            Err(_) => debug!(workload = %record.id, %network, %ip, "skipping non-IPv4 address"),
        }
    }

    WorkloadFacts {
        running: record.state.status == "running",
        environment: record.config.env.unwrap_or_default(),
        exposed_ports,
        port_bindings,
        network_addresses,
        id: record.id,
        name: record.name,
    }
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "Actor", default)]
    actor: Option<RawActor>,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    #[serde(rename = "ID", default)]
    id: Option<String>,
}

/// Parses one line of `docker events --format '{{json .}}'`.
///
/// Newer engines drop the legacy `status`/`id` fields in favour of `Action`/`Actor.ID`.
pub fn parse_event(line: &str) -> Option<WorkloadEvent> {
    let raw: RawEvent = serde_json::from_str(line.trim()).ok()?;
    let status = raw.status.or(raw.action)?;
    let id = raw.id.or_else(|| raw.actor.and_then(|actor| actor.id))?;
    Some(WorkloadEvent { status, id })
}
