use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::models::{WorkloadEvent, WorkloadFacts};

/// The container runtime, the source of truth for which workloads exist.
#[async_trait]
pub trait WorkloadSource: Send + Sync {
    /// Ids of the workloads the runtime currently lists as running.
    async fn list_running(&self) -> Result<Vec<String>>;

    /// Fresh facts for one workload; `WorkloadNotFound` once it has been removed.
    async fn inspect(&self, id: &str) -> Result<WorkloadFacts>;

    /// Opens the lifecycle event stream. The receiver closes when the stream breaks.
    async fn stream_events(&self) -> Result<mpsc::Receiver<WorkloadEvent>>;

    /// Checks the runtime answers, returning its version.
    async fn ping(&self) -> Result<String>;
}
