use std::path::Path;

use crate::error::{RegistratorError, Result};
use crate::models::config::MIN_RESYNC_INTERVAL_SECONDS;
use crate::models::RegistratorConfig;

use super::consul;

/// Reads a YAML config file. The result still has to pass [`validate`].
pub fn load(config_path: &Path) -> Result<RegistratorConfig> {
    if !config_path.exists() {
        return Err(RegistratorError::ConfigNotFound(config_path.to_path_buf()));
    }
    let contents = std::fs::read_to_string(config_path)?;
    serde_yaml::from_str(&contents).map_err(|e| RegistratorError::InvalidConfig(e.to_string()))
}

pub fn validate(config: &RegistratorConfig) -> Result<()> {
    consul::base_url(&config.registry_endpoint)?;
    if config.resync_interval_seconds < MIN_RESYNC_INTERVAL_SECONDS {
        return Err(RegistratorError::InvalidConfig(format!(
            "resync interval must be at least {MIN_RESYNC_INTERVAL_SECONDS} seconds, got {}",
            config.resync_interval_seconds
        )));
    }
    if config.max_concurrency == 0 {
        return Err(RegistratorError::InvalidConfig(
            "max concurrency must be greater than zero".into(),
        ));
    }
    if config.call_timeout_seconds == 0 {
        return Err(RegistratorError::InvalidConfig(
            "call timeout must be greater than zero".into(),
        ));
    }
    if config.docker_binary.trim().is_empty() {
        return Err(RegistratorError::InvalidConfig(
            "docker binary must not be empty".into(),
        ));
    }
    Ok(())
}
