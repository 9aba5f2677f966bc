use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RegistratorError {
    #[error("workload '{0}' not found")]
    WorkloadNotFound(String),

    #[error("inspection failed: {0}")]
    Inspection(String),

    #[error("registry operation failed: {0}")]
    Registry(String),

    #[error("event stream broken: {0}")]
    Stream(String),

    #[error("config file not found at {0}")]
    ConfigNotFound(PathBuf),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl RegistratorError {
    /// Whether the error means the workload no longer exists on the runtime.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::WorkloadNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, RegistratorError>;
