use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use registrator_core::models::RegistratorConfig;
use registrator_core::services::{
    config_loader, interfaces, ConsulRegistry, DockerCli, EventDispatcher, ReconciliationSweep,
    Registry, Synchronizer, WorkloadSource,
};

/// Validates the settings, then runs the event dispatcher and the periodic sweep
/// until Ctrl-C or SIGTERM.
pub async fn run(mut config: RegistratorConfig) -> color_eyre::Result<()> {
    config_loader::validate(&config).wrap_err("invalid configuration")?;

    if config.restrict_to_own_network {
        config.own_addresses =
            interfaces::own_addresses().wrap_err("failed to discover host networks")?;
        let networks: Vec<String> = config
            .own_addresses
            .iter()
            .map(ToString::to_string)
            .collect();
        info!(networks = %networks.join(", "), "restricting to own networks");
    }

    let config = Arc::new(config);
    let registry: Arc<dyn Registry> = Arc::new(ConsulRegistry::new(&config)?);
    let source: Arc<dyn WorkloadSource> = Arc::new(DockerCli::new(config.docker_binary.clone()));
    let sync = Synchronizer::new(source, registry, config.clone());

    info!(
        consul = %config.registry_endpoint,
        resync_secs = config.resync_interval_seconds,
        port_bindings_only = config.port_bindings_only,
        "registrator starting"
    );

    let cancel = CancellationToken::new();
    let dispatcher = EventDispatcher::new(sync.clone());
    let dispatcher_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { dispatcher.run(cancel).await }
    });
    let sweep = ReconciliationSweep::new(sync);
    let sweep_task = tokio::spawn({
        let cancel = cancel.clone();
        async move { sweep.run(cancel).await }
    });

    let outcome = wait_for_shutdown().await;
    cancel.cancel();
    let (dispatcher_done, sweep_done) = tokio::join!(dispatcher_task, sweep_task);
    dispatcher_done.wrap_err("event dispatcher panicked")?;
    sweep_done.wrap_err("reconciliation sweep panicked")?;
    info!("registrator stopped");
    outcome
}

/// Asks the Docker daemon for its version.
pub async fn ping(config: &RegistratorConfig) -> color_eyre::Result<String> {
    let docker = DockerCli::new(config.docker_binary.clone());
    let version = registrator_core::services::sync::within(
        config.call_timeout(),
        "ping",
        docker.ping(),
    )
    .await?;
    Ok(version)
}

async fn wait_for_shutdown() -> color_eyre::Result<()> {
    tokio::select! {
        result = wait_ctrl_c() => result?,
        result = wait_sigterm() => result?,
    }
    info!("shutdown signal received");
    Ok(())
}

async fn wait_ctrl_c() -> color_eyre::Result<()> {
    signal::ctrl_c().await.map_err(|e| {
        error!(%e, "error handling Ctrl+C signal");
        e
    })?;
    Ok(())
}

#[cfg(unix)]
async fn wait_sigterm() -> color_eyre::Result<()> {
    let mut terminate =
        signal::unix::signal(signal::unix::SignalKind::terminate()).map_err(|e| {
            error!(%e, "failed to install SIGTERM handler");
            e
        })?;
    terminate.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_sigterm() -> color_eyre::Result<()> {
    std::future::pending::<color_eyre::Result<()>>().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn short_resync_interval_is_fatal_before_start() {
        let mut config = RegistratorConfig::new("127.0.0.1:8500");
        config.resync_interval_seconds = 10;
        let err = run(config).await.unwrap_err();
        assert!(format!("{err:?}").contains("at least 30"));
    }

    #[tokio::test]
    async fn missing_endpoint_is_fatal_before_start() {
        assert!(run(RegistratorConfig::new("")).await.is_err());
    }

    #[tokio::test]
    async fn ping_reports_missing_binary() {
        let mut config = RegistratorConfig::new("127.0.0.1:8500");
        config.docker_binary = "/nonexistent/docker".to_string();
        assert!(ping(&config).await.is_err());
    }
}
