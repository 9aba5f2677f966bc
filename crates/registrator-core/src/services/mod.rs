pub mod annotations;
pub mod config_loader;
pub mod consul;
pub mod derivation;
pub mod dispatcher;
pub mod docker;
pub mod interfaces;
pub mod registry;
pub mod runtime;
pub mod sweep;
pub mod sync;

pub use consul::ConsulRegistry;
pub use dispatcher::EventDispatcher;
pub use docker::DockerCli;
pub use registry::Registry;
pub use runtime::WorkloadSource;
pub use sweep::{ReconciliationSweep, SweepReport};
pub use sync::{Synchronizer, Tally};
