//! Service registry: dependency-injection container
//!
//! Stores named service definitions (instances or factories), resolves
//! declared dependencies recursively, builds singletons on demand, rejects
//! circular registration graphs, and runs ordered disposal.

pub mod entry;
#[allow(clippy::module_inception)]
pub mod registry;

pub use entry::{
    DisposeFn, HealthCheckFn, HealthStatus, InitializeFn, RegistryError, ResolvedServices,
    ServiceDefinition, ServiceFactory, ServiceOptions, ServiceValue,
};
pub use registry::{ServiceRegistry, DEFAULT_WAIT_POLL};
