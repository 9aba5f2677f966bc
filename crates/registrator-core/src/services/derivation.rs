//! Turns an inspected workload into the registry entries that advertise it.
//!
//! Everything here is pure: the same facts and config always produce the same
//! definitions, in the same order, which is what makes repeated registration
//! an idempotent upsert.

use std::net::{IpAddr, Ipv4Addr};

use crate::models::{service_id, HealthCheck, RegistratorConfig, ServiceDefinition, WorkloadFacts};

use super::annotations::{Annotations, CheckTarget, Scope};

/// How a workload's endpoints are declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One service per host-side port mapping.
    PortBindings,
    /// One service per port declared by the image.
    ExposedPorts,
    /// A single service without a port.
    Portless,
}

impl Mode {
    pub fn select(facts: &WorkloadFacts, config: &RegistratorConfig) -> Self {
        if config.port_bindings_only {
            Self::PortBindings
        } else if !facts.exposed_ports.is_empty() {
            Self::ExposedPorts
        } else {
            Self::Portless
        }
    }
}

/// The definitions to register for `facts`, or nothing when the workload is not
/// eligible for registration at all.
pub fn derive(facts: &WorkloadFacts, config: &RegistratorConfig) -> Vec<ServiceDefinition> {
    let annotations = Annotations::parse(&facts.environment);
    let addresses = usable_addresses(facts, config);
    if !is_eligible(facts, config, &annotations, &addresses) {
        return Vec::new();
    }
    plan(facts, config, &annotations, &addresses)
}

/// Ids of every service the workload would advertise, ignoring eligibility.
///
/// Used when a workload stops: it is no longer running, but the ids it was
/// registered under still follow from its metadata.
pub fn service_ids(facts: &WorkloadFacts, config: &RegistratorConfig) -> Vec<String> {
    let annotations = Annotations::parse(&facts.environment);
    let addresses = usable_addresses(facts, config);
    plan(facts, config, &annotations, &addresses)
        .into_iter()
        .map(|service| service.id)
        .collect()
}

/// Workload addresses the registry may advertise, sorted so the first one is stable.
pub fn usable_addresses(facts: &WorkloadFacts, config: &RegistratorConfig) -> Vec<Ipv4Addr> {
    let mut addresses: Vec<Ipv4Addr> = facts
        .network_addresses
        .values()
        .copied()
        .filter(|ip| !ip.is_unspecified())
        .filter(|ip| !config.restrict_to_own_network || config.is_own_network(*ip))
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

fn is_eligible(
    facts: &WorkloadFacts,
    config: &RegistratorConfig,
    annotations: &Annotations,
    addresses: &[Ipv4Addr],
) -> bool {
    if !facts.running || annotations.is_ignored(Scope::Global) || addresses.is_empty() {
        return false;
    }
    !(config.port_bindings_only && facts.port_bindings.is_empty())
}

/// Global name and tags that per-port annotations fall back to.
struct Defaults {
    name: String,
    tags: Vec<String>,
}

fn plan(
    facts: &WorkloadFacts,
    config: &RegistratorConfig,
    annotations: &Annotations,
    addresses: &[Ipv4Addr],
) -> Vec<ServiceDefinition> {
    let defaults = Defaults {
        name: annotations.name(Scope::Global, &facts.normalized_name()),
        tags: annotations.tags(Scope::Global, &[]),
    };
    let first_address = addresses
        .first()
        .map(|ip| ip.to_string())
        .unwrap_or_default();

    let mut services: Vec<ServiceDefinition> = Vec::new();
    let mut push = |service: ServiceDefinition| {
        if !services.iter().any(|s| s.id == service.id) {
            services.push(service);
        }
    };

    match Mode::select(facts, config) {
        Mode::PortBindings => {
            for binding in &facts.port_bindings {
                let scope = Scope::Port(binding.container_port);
                if annotations.is_ignored(scope) {
                    continue;
                }
                let name = annotations.name(scope, &defaults.name);
                // Checks target the container side; the registry advertises the host side.
                let checks = checks_for(
                    annotations,
                    scope,
                    CheckTarget {
                        addresses,
                        port: Some(binding.container_port),
                    },
                );
                push(ServiceDefinition {
                    id: service_id(
                        &facts.id,
                        &name,
                        Some((binding.host_port, binding.protocol)),
                    ),
                    name,
                    tags: annotations.tags(scope, &defaults.tags),
                    address: host_address(&binding.host_address),
                    port: Some(binding.host_port),
                    checks,
                });
            }
        }
        Mode::ExposedPorts => {
            for exposed in &facts.exposed_ports {
                let scope = Scope::Port(exposed.port);
                if annotations.is_ignored(scope) {
                    continue;
                }
                let name = annotations.name(scope, &defaults.name);
                let checks = checks_for(
                    annotations,
                    scope,
                    CheckTarget {
                        addresses,
                        port: Some(exposed.port),
                    },
                );
                push(ServiceDefinition {
                    id: service_id(&facts.id, &name, Some((exposed.port, exposed.protocol))),
                    name,
                    tags: annotations.tags(scope, &defaults.tags),
                    address: first_address.clone(),
                    port: Some(exposed.port),
                    checks,
                });
            }
        }
        Mode::Portless => {
            let checks = annotations.checks(
                Scope::Global,
                CheckTarget {
                    addresses,
                    port: None,
                },
                &[],
            );
            push(ServiceDefinition {
                id: service_id(&facts.id, &defaults.name, None),
                name: defaults.name,
                tags: defaults.tags,
                address: first_address,
                port: None,
                checks,
            });
        }
    }
    services
}

/// Global checks evaluated for this port, merged with the port's own checks.
fn checks_for(annotations: &Annotations, scope: Scope, target: CheckTarget<'_>) -> Vec<HealthCheck> {
    let global = annotations.checks(Scope::Global, target, &[]);
    annotations.checks(scope, target, &global)
}

/// Wildcard bind addresses carry no endpoint; an empty address lets the registry
/// substitute its own node address.
fn host_address(raw: &str) -> String {
    match raw.trim().parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() => String::new(),
        _ => raw.trim().to_string(),
    }
}
