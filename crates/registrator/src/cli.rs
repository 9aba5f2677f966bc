use std::path::PathBuf;

use clap::{Parser, Subcommand};

use registrator_core::models::RegistratorConfig;
use registrator_core::services::config_loader;

#[derive(Debug, Parser)]
#[command(
    name = "registrator",
    version,
    about = "Registers running Docker containers as Consul services"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Consul agent address, `host:port` or a full URL.
    #[arg(long, env = "REGISTRATOR_CONSUL", global = true)]
    pub consul: Option<String>,

    /// Seconds between reconciliation sweeps (at least 30, default 3600).
    #[arg(long, env = "REGISTRATOR_RESYNC", global = true)]
    pub resync: Option<u64>,

    /// Register only addresses inside this host's own subnets.
    #[arg(long, env = "REGISTRATOR_OWN_NETWORK_ONLY", global = true)]
    pub own_network_only: bool,

    /// Register published host ports instead of exposed container ports.
    #[arg(long, env = "REGISTRATOR_PORT_BINDINGS_ONLY", global = true)]
    pub port_bindings_only: bool,

    /// YAML file with the same settings; flags win over file values.
    #[arg(long, env = "REGISTRATOR_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Docker client binary.
    #[arg(long, env = "REGISTRATOR_DOCKER", global = true)]
    pub docker: Option<String>,

    /// Most Docker and Consul calls in flight at once (default 16).
    #[arg(long, env = "REGISTRATOR_MAX_CONCURRENCY", global = true)]
    pub max_concurrency: Option<usize>,

    /// Per-call timeout in seconds for Docker and Consul requests.
    #[arg(long, env = "REGISTRATOR_CALL_TIMEOUT", global = true)]
    pub call_timeout: Option<u64>,

    /// Consul ACL token, sent as `X-Consul-Token`.
    #[arg(long, env = "REGISTRATOR_CONSUL_TOKEN", global = true, hide_env_values = true)]
    pub consul_token: Option<String>,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "REGISTRATOR_LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Check that the Docker daemon answers; exits 0 when it does.
    Ping,
}

impl Cli {
    /// Settings from the config file, if any, with command-line overrides applied.
    /// The result is not validated yet.
    pub fn to_config(&self) -> registrator_core::Result<RegistratorConfig> {
        let mut config = match &self.config {
            Some(path) => config_loader::load(path)?,
            None => RegistratorConfig::new(""),
        };

        if let Some(consul) = &self.consul {
            config.registry_endpoint = consul.clone();
        }
        if let Some(resync) = self.resync {
            config.resync_interval_seconds = resync;
        }
        if self.own_network_only {
            config.restrict_to_own_network = true;
        }
        if self.port_bindings_only {
            config.port_bindings_only = true;
        }
        if let Some(docker) = &self.docker {
            config.docker_binary = docker.clone();
        }
        if let Some(max_concurrency) = self.max_concurrency {
            config.max_concurrency = max_concurrency;
        }
        if let Some(call_timeout) = self.call_timeout {
            config.call_timeout_seconds = call_timeout;
        }
        if let Some(token) = &self.consul_token {
            config.registry_token = Some(token.clone());
        }
        Ok(config)
    }
}
