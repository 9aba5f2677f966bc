pub mod config;
pub mod event;
pub mod service;
pub mod workload;

pub use config::{OwnAddress, RegistratorConfig};
pub use event::{EventAction, WorkloadEvent};
pub use service::{service_id, HealthCheck, RegistryEntry, ServiceDefinition};
pub use workload::{ExposedPort, PortBinding, Protocol, WorkloadFacts};
