// Each test binary compiles this module independently and uses a different
// subset of helpers, so unused-function warnings are expected.
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use registrator_core::models::{
    ExposedPort, Protocol, RegistratorConfig, ServiceDefinition, WorkloadEvent, WorkloadFacts,
};
use registrator_core::services::{Registry, Synchronizer, WorkloadSource};
use registrator_core::{RegistratorError, Result};

/// In-memory container runtime.
#[derive(Default)]
pub struct FakeSource {
    workloads: Mutex<BTreeMap<String, WorkloadFacts>>,
    broken: Mutex<BTreeSet<String>>,
    hung: Mutex<BTreeSet<String>>,
    streams: Mutex<VecDeque<Vec<WorkloadEvent>>>,
    idle: Mutex<Vec<mpsc::Sender<WorkloadEvent>>>,
    opens: AtomicUsize,
}

impl FakeSource {
    pub fn put(&self, facts: WorkloadFacts) {
        self.workloads
            .lock()
            .unwrap()
            .insert(facts.id.clone(), facts);
    }

    pub fn remove(&self, id: &str) {
        self.workloads.lock().unwrap().remove(id);
    }

    pub fn stop(&self, id: &str) {
        if let Some(facts) = self.workloads.lock().unwrap().get_mut(id) {
            facts.running = false;
        }
    }

    /// Makes every inspection of `id` fail with a non-NotFound error.
    pub fn break_inspection(&self, id: &str) {
        self.broken.lock().unwrap().insert(id.to_string());
    }

    /// Makes every inspection of `id` wait forever.
    pub fn hang_inspection(&self, id: &str) {
        self.hung.lock().unwrap().insert(id.to_string());
    }

    /// Queues one stream: the events are delivered, then the stream closes.
    pub fn queue_stream(&self, events: Vec<WorkloadEvent>) {
        self.streams.lock().unwrap().push_back(events);
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkloadSource for FakeSource {
    async fn list_running(&self) -> Result<Vec<String>> {
        Ok(self
            .workloads
            .lock()
            .unwrap()
            .values()
            .filter(|facts| facts.running)
            .map(|facts| facts.id.clone())
            .collect())
    }

    async fn inspect(&self, id: &str) -> Result<WorkloadFacts> {
        let hung = self.hung.lock().unwrap().contains(id);
        if hung {
            std::future::pending::<()>().await;
        }
        if self.broken.lock().unwrap().contains(id) {
            return Err(RegistratorError::Inspection(format!("{id}: daemon busy")));
        }
        self.workloads
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistratorError::WorkloadNotFound(id.to_string()))
    }

    async fn stream_events(&self) -> Result<mpsc::Receiver<WorkloadEvent>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let queued = self.streams.lock().unwrap().pop_front();
        let (tx, rx) = mpsc::channel(64);
        match queued {
            Some(events) => {
                for event in events {
                    tx.send(event).await.unwrap();
                }
            }
            // Nothing left to replay: keep the stream open and quiet.
            None => self.idle.lock().unwrap().push(tx),
        }
        Ok(rx)
    }

    async fn ping(&self) -> Result<String> {
        Ok("fake".to_string())
    }
}

/// In-memory registry keyed by service id.
pub struct FakeRegistry {
    services: Mutex<BTreeMap<String, ServiceDefinition>>,
    rejected: Mutex<BTreeSet<String>>,
    stalled: Mutex<BTreeSet<String>>,
    registrations: AtomicUsize,
}

impl FakeRegistry {
    pub fn new() -> Self {
        let registry = Self {
            services: Mutex::new(BTreeMap::new()),
            rejected: Mutex::new(BTreeSet::new()),
            stalled: Mutex::new(BTreeSet::new()),
            registrations: AtomicUsize::new(0),
        };
        registry.seed("consul");
        registry
    }

    /// Adds an entry directly, as if another agent run had written it.
    pub fn seed(&self, service_id: &str) {
        let service = ServiceDefinition {
            id: service_id.to_string(),
            name: service_id.to_string(),
            tags: Vec::new(),
            address: String::new(),
            port: None,
            checks: Vec::new(),
        };
        self.services
            .lock()
            .unwrap()
            .insert(service_id.to_string(), service);
    }

    /// Makes registration of `service_id` fail.
    pub fn reject(&self, service_id: &str) {
        self.rejected.lock().unwrap().insert(service_id.to_string());
    }

    /// Makes registration of `service_id` never answer.
    pub fn stall(&self, service_id: &str) {
        self.stalled.lock().unwrap().insert(service_id.to_string());
    }

    pub fn ids(&self) -> Vec<String> {
        self.services.lock().unwrap().keys().cloned().collect()
    }

    pub fn get(&self, service_id: &str) -> Option<ServiceDefinition> {
        self.services.lock().unwrap().get(service_id).cloned()
    }

    pub fn registrations(&self) -> usize {
        self.registrations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for FakeRegistry {
    async fn register(&self, service: &ServiceDefinition) -> Result<()> {
        let stalled = self.stalled.lock().unwrap().contains(&service.id);
        if stalled {
            std::future::pending::<()>().await;
        }
        if self.rejected.lock().unwrap().contains(&service.id) {
            return Err(RegistratorError::Registry(format!(
                "register {}: 500 Internal Server Error",
                service.id
            )));
        }
        self.registrations.fetch_add(1, Ordering::SeqCst);
        self.services
            .lock()
            .unwrap()
            .insert(service.id.clone(), service.clone());
        Ok(())
    }

    async fn deregister(&self, service_id: &str) -> Result<()> {
        self.services.lock().unwrap().remove(service_id);
        Ok(())
    }

    async fn list_service_ids(&self) -> Result<Vec<String>> {
        Ok(self.ids())
    }

    fn self_id(&self) -> &str {
        "consul"
    }
}

/// A running workload on the default bridge network exposing the given tcp ports.
pub fn workload(id: &str, name: &str, ports: &[u16]) -> WorkloadFacts {
    let mut facts = WorkloadFacts::new(id, name);
    facts.running = true;
    facts
        .network_addresses
        .insert("bridge".into(), Ipv4Addr::new(172, 17, 0, 2));
    for port in ports {
        facts
            .exposed_ports
            .insert(ExposedPort::new(*port, Protocol::Tcp));
    }
    facts
}

pub struct Harness {
    pub source: Arc<FakeSource>,
    pub registry: Arc<FakeRegistry>,
    pub sync: Synchronizer,
}

pub fn harness() -> Harness {
    harness_with(RegistratorConfig::new("127.0.0.1:8500"))
}

pub fn harness_with(config: RegistratorConfig) -> Harness {
    let source = Arc::new(FakeSource::default());
    let registry = Arc::new(FakeRegistry::new());
    let sync = Synchronizer::new(source.clone(), registry.clone(), Arc::new(config));
    Harness {
        source,
        registry,
        sync,
    }
}
