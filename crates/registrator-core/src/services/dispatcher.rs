use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::models::{EventAction, WorkloadEvent};

use super::sync::{Synchronizer, Tally};

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Doubling reconnect delay, capped at [`MAX_BACKOFF`].
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next: INITIAL_BACKOFF,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(MAX_BACKOFF);
        delay
    }

    pub fn reset(&mut self) {
        self.next = INITIAL_BACKOFF;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Applies runtime lifecycle events to the registry as they happen.
#[derive(Clone)]
pub struct EventDispatcher {
    sync: Synchronizer,
    in_flight: Arc<Semaphore>,
}

impl EventDispatcher {
    pub fn new(sync: Synchronizer) -> Self {
        let in_flight = Arc::new(Semaphore::new(sync.max_concurrency()));
        Self { sync, in_flight }
    }

    /// Consumes the event stream until `cancel` fires, reopening it whenever it breaks.
    ///
    /// A closed stream says nothing about which workloads exist, so it never
    /// triggers deregistration; the sweep covers the gap until the stream is back.
    /// The reconnect delay only resets once a stream has proven healthy: it
    /// delivered an event, or stayed open for [`MAX_BACKOFF`].
    pub async fn run(&self, cancel: CancellationToken) {
        let mut backoff = Backoff::new();
        loop {
            let opened = self
                .sync
                .call("open event stream", self.sync.source().stream_events())
                .await;
            match opened {
                Ok(events) => {
                    info!("listening for workload events");
                    let opened_at = Instant::now();
                    let delivered = self.consume(events, &cancel).await;
                    if cancel.is_cancelled() {
                        break;
                    }
                    if delivered > 0 || opened_at.elapsed() >= MAX_BACKOFF {
                        backoff.reset();
                    }
                    warn!(delivered, "event stream ended");
                }
                Err(e) => error!(error = %e, "failed to open event stream"),
            }

            let delay = backoff.next_delay();
            info!(delay_secs = delay.as_secs(), "reconnecting to event stream");
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
        info!("event dispatcher stopped");
    }

    /// Dispatches events until the stream closes or `cancel` fires. A closed stream
    /// lets in-flight handlers finish; cancellation aborts them. Returns how many
    /// events the stream delivered.
    async fn consume(
        &self,
        mut events: mpsc::Receiver<WorkloadEvent>,
        cancel: &CancellationToken,
    ) -> usize {
        let mut handlers = JoinSet::new();
        let mut delivered = 0;
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };
            delivered += 1;
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = self.in_flight.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let dispatcher = self.clone();
            handlers.spawn(async move {
                let _permit = permit;
                dispatcher.handle(event).await;
            });
            while handlers.try_join_next().is_some() {}
        }
        if cancel.is_cancelled() {
            handlers.shutdown().await;
        } else {
            while handlers.join_next().await.is_some() {}
        }
        delivered
    }

    /// Applies a single event and waits for every registry call it causes.
    pub async fn handle(&self, event: WorkloadEvent) -> Tally {
        match event.action() {
            EventAction::Register => {
                debug!(workload = %event.id, status = %event.status, "registering workload");
                self.sync.register_workload(&event.id).await
            }
            EventAction::Deregister => {
                debug!(workload = %event.id, status = %event.status, "deregistering workload");
                self.sync.deregister_workload(&event.id).await
            }
            EventAction::HealthStatus(state) => {
                info!(workload = %event.id, %state, "health status changed");
                Tally::default()
            }
            EventAction::Ignore => Tally::default(),
        }
    }
}
