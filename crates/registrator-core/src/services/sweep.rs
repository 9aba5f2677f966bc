use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::RegistryEntry;

use super::sync::{Synchronizer, Tally};

/// Counts from one reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub workloads_seen: usize,
    pub registered: usize,
    pub deregistered: usize,
    pub failures: usize,
}

impl SweepReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            workloads_seen: 0,
            registered: 0,
            deregistered: 0,
            failures: 0,
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sweep started {}: {} workloads, {} registered, {} deregistered, {} failures",
            self.started_at.format("%Y-%m-%dT%H:%M:%SZ"),
            self.workloads_seen,
            self.registered,
            self.deregistered,
            self.failures
        )
    }
}

/// Periodic full comparison of runtime and registry state.
pub struct ReconciliationSweep {
    sync: Synchronizer,
}

impl ReconciliationSweep {
    pub fn new(sync: Synchronizer) -> Self {
        Self { sync }
    }

    /// Sweeps once immediately, then every resync interval until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.sync.config().resync_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let report = tokio::select! {
                _ = cancel.cancelled() => break,
                report = self.run_once() => report,
            };
            info!(
                workloads = report.workloads_seen,
                registered = report.registered,
                deregistered = report.deregistered,
                failures = report.failures,
                "{report}"
            );
        }
        info!("reconciliation sweep stopped");
    }

    /// Registers every eligible running workload and removes entries whose
    /// workload is gone or stopped.
    pub async fn run_once(&self) -> SweepReport {
        let mut report = SweepReport::new(Utc::now());
        let (forward, reverse) = tokio::join!(self.forward_pass(), self.reverse_pass());

        let (seen, registered) = forward;
        report.workloads_seen = seen;
        report.registered = registered.succeeded;
        report.failures += registered.failed;
        report.deregistered = reverse.succeeded;
        report.failures += reverse.failed;
        report
    }

    async fn forward_pass(&self) -> (usize, Tally) {
        let running = match self
            .sync
            .call("list workloads", self.sync.source().list_running())
            .await
        {
            Ok(ids) => ids,
            Err(e) => {
                error!(error = %e, "failed to list running workloads");
                return (0, Tally::failure());
            }
        };

        let seen = running.len();
        let sync = &self.sync;
        let outcomes: Vec<Tally> = stream::iter(running)
            .map(|id| async move { sync.register_workload(&id).await })
            .buffer_unordered(sync.max_concurrency())
            .collect()
            .await;

        let mut total = Tally::default();
        for outcome in outcomes {
            total += outcome;
        }
        (seen, total)
    }

    async fn reverse_pass(&self) -> Tally {
        let entries = match self
            .sync
            .call("list services", self.sync.registry().list_entries())
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "failed to list registered services");
                return Tally::failure();
            }
        };

        let sync = &self.sync;
        let outcomes: Vec<Tally> = stream::iter(group_by_workload(entries))
            .map(|(workload_id, service_ids)| async move {
                match sync.inspect(&workload_id).await {
                    Ok(facts) if facts.running => Tally::default(),
                    Ok(_) => {
                        debug!(workload = %workload_id, "workload stopped");
                        sync.deregister_ids(service_ids).await
                    }
                    Err(e) if e.is_not_found() => {
                        debug!(workload = %workload_id, "workload removed");
                        sync.deregister_ids(service_ids).await
                    }
                    Err(e) => {
                        warn!(workload = %workload_id, error = %e, "inspection failed, keeping services");
                        Tally::failure()
                    }
                }
            })
            .buffer_unordered(sync.max_concurrency())
            .collect()
            .await;

        let mut total = Tally::default();
        for outcome in outcomes {
            total += outcome;
        }
        total
    }
}

fn group_by_workload(entries: Vec<RegistryEntry>) -> BTreeMap<String, Vec<String>> {
    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for entry in entries {
        groups
            .entry(entry.workload_id)
            .or_default()
            .push(entry.service_id);
    }
    groups
}
