//! Units of work shared by the event dispatcher and the reconciliation sweep.
//!
//! Every runtime or registry call goes through [`Synchronizer::call`], which bounds
//! the number of calls in flight across the whole agent and gives each one a
//! deadline. Failures are logged and counted here, never propagated: a broken
//! workload or service must not stop its siblings.

use std::future::Future;
use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::error::{RegistratorError, Result};
use crate::models::{RegistratorConfig, ServiceDefinition, WorkloadFacts};

use super::derivation;
use super::registry::Registry;
use super::runtime::WorkloadSource;

/// Outcome counts of a batch of registry mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub succeeded: usize,
    pub failed: usize,
}

impl Tally {
    pub fn failure() -> Self {
        Self {
            succeeded: 0,
            failed: 1,
        }
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
    }
}

#[derive(Clone)]
pub struct Synchronizer {
    source: Arc<dyn WorkloadSource>,
    registry: Arc<dyn Registry>,
    config: Arc<RegistratorConfig>,
    limiter: Arc<Semaphore>,
}

impl Synchronizer {
    pub fn new(
        source: Arc<dyn WorkloadSource>,
        registry: Arc<dyn Registry>,
        config: Arc<RegistratorConfig>,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            source,
            registry,
            config,
            limiter,
        }
    }

    pub fn source(&self) -> &dyn WorkloadSource {
        self.source.as_ref()
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    pub fn config(&self) -> &RegistratorConfig {
        &self.config
    }

    pub fn max_concurrency(&self) -> usize {
        self.config.max_concurrency.max(1)
    }

    /// Runs one runtime or registry call under the shared concurrency limit and
    /// the per-call timeout.
    pub async fn call<T, F>(&self, operation: &str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        // The semaphore is never closed; a closed one would only lift the limit.
        let _permit = self.limiter.acquire().await.ok();
        within(self.config.call_timeout(), operation, future).await
    }

    pub async fn inspect(&self, workload_id: &str) -> Result<WorkloadFacts> {
        self.call("inspect", self.source.inspect(workload_id)).await
    }

    /// Inspects a workload and registers every service it derives to.
    pub async fn register_workload(&self, workload_id: &str) -> Tally {
        let facts = match self.inspect(workload_id).await {
            Ok(facts) => facts,
            Err(e) => {
                warn!(workload = %workload_id, error = %e, "inspection failed");
                return Tally::failure();
            }
        };
        let services = derivation::derive(&facts, &self.config);
        if services.is_empty() {
            debug!(workload = %workload_id, "workload not eligible for registration");
        }
        self.register_services(services).await
    }

    pub async fn register_services(&self, services: Vec<ServiceDefinition>) -> Tally {
        let outcomes: Vec<Tally> = stream::iter(services)
            .map(|service| async move {
                match self
                    .call("register", self.registry.register(&service))
                    .await
                {
                    Ok(()) => {
                        info!(service_id = %service.id, "registered");
                        Tally {
                            succeeded: 1,
                            failed: 0,
                        }
                    }
                    Err(e) => {
                        warn!(service_id = %service.id, error = %e, "registration failed");
                        Tally::failure()
                    }
                }
            })
            .buffer_unordered(self.max_concurrency())
            .collect()
            .await;
        sum(outcomes)
    }

    /// Removes every service of a workload that stopped, paused or disappeared.
    ///
    /// Ids come from the workload's metadata when it can still be inspected; when it
    /// is gone, or its metadata no longer names any service, the registry listing
    /// supplies every id carrying the workload's prefix instead.
    pub async fn deregister_workload(&self, workload_id: &str) -> Tally {
        let mut service_ids = match self.inspect(workload_id).await {
            Ok(facts) => derivation::service_ids(&facts, &self.config),
            Err(e) => {
                if !e.is_not_found() {
                    warn!(workload = %workload_id, error = %e, "inspection failed");
                }
                Vec::new()
            }
        };

        if service_ids.is_empty() {
            service_ids = match self.registered_ids_of(workload_id).await {
                Ok(ids) => ids,
                Err(e) => {
                    warn!(workload = %workload_id, error = %e, "registry listing failed");
                    return Tally::failure();
                }
            };
        }
        self.deregister_ids(service_ids).await
    }

    pub async fn deregister_ids(&self, service_ids: Vec<String>) -> Tally {
        let outcomes: Vec<Tally> = stream::iter(service_ids)
            .map(|service_id| async move {
                match self
                    .call("deregister", self.registry.deregister(&service_id))
                    .await
                {
                    Ok(()) => {
                        info!(service_id = %service_id, "deregistered");
                        Tally {
                            succeeded: 1,
                            failed: 0,
                        }
                    }
                    Err(e) => {
                        warn!(service_id = %service_id, error = %e, "deregistration failed");
                        Tally::failure()
                    }
                }
            })
            .buffer_unordered(self.max_concurrency())
            .collect()
            .await;
        sum(outcomes)
    }

    async fn registered_ids_of(&self, workload_id: &str) -> Result<Vec<String>> {
        let entries = self
            .call("list services", self.registry.list_entries())
            .await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.workload_id == workload_id)
            .map(|entry| entry.service_id)
            .collect())
    }
}

/// Awaits `future`, failing with [`RegistratorError::Timeout`] once `limit` elapses.
pub async fn within<T, F>(limit: Duration, operation: &str, future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(RegistratorError::Timeout {
            operation: operation.to_string(),
            after: limit,
        }),
    }
}

fn sum(outcomes: Vec<Tally>) -> Tally {
    let mut total = Tally::default();
    for outcome in outcomes {
        total += outcome;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn within_times_out_hung_calls() {
        let hung = std::future::pending::<Result<()>>();
        let err = within(Duration::from_secs(5), "inspect", hung)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistratorError::Timeout { ref operation, .. } if operation == "inspect"));
        assert_eq!(err.to_string(), "inspect timed out after 5s");
    }

    #[tokio::test]
    async fn within_passes_through_results() {
        let value = within(Duration::from_secs(5), "noop", async { Ok(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn tallies_add_up() {
        let total = sum(vec![
            Tally {
                succeeded: 2,
                failed: 0,
            },
            Tally::failure(),
        ]);
        assert_eq!(
            total,
            Tally {
                succeeded: 2,
                failed: 1
            }
        );
    }
}
