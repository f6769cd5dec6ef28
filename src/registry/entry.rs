//! Service entry types and registry errors
//!
//! Defines what can be registered in the service registry: instances or
//! factories, with per-entry options and hooks.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A resolved service value. Services are type-erased; use
/// [`ServiceRegistry::get_as`](crate::registry::ServiceRegistry::get_as) for
/// typed access.
pub type ServiceValue = Arc<dyn Any + Send + Sync>;

/// Dependencies resolved for a factory, keyed by dependency name.
pub type ResolvedServices = HashMap<String, ServiceValue>;

/// Factory constructing a service from its resolved dependencies.
pub type ServiceFactory =
    Arc<dyn Fn(&ResolvedServices) -> Result<ServiceValue, RegistryError> + Send + Sync>;

/// Post-construction hook, run once per constructed instance.
pub type InitializeFn = Arc<dyn Fn(&ServiceValue) -> Result<(), String> + Send + Sync>;

/// On-demand liveness probe for a constructed service.
pub type HealthCheckFn = Arc<dyn Fn(&ServiceValue) -> Result<(), String> + Send + Sync>;

/// Teardown hook, run at registry disposal for constructed singletons.
pub type DisposeFn = Arc<dyn Fn(&ServiceValue) -> Result<(), String> + Send + Sync>;

/// How a service is produced.
#[derive(Clone)]
pub enum ServiceDefinition {
    /// A ready-made value, shared as-is (singleton only).
    Instance(ServiceValue),
    /// A factory invoked with resolved dependencies.
    Factory(ServiceFactory),
}

impl std::fmt::Debug for ServiceDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceDefinition::Instance(_) => f.write_str("ServiceDefinition::Instance"),
            ServiceDefinition::Factory(_) => f.write_str("ServiceDefinition::Factory"),
        }
    }
}

/// Registration options for a service entry.
#[derive(Clone)]
pub struct ServiceOptions {
    /// Construct at most once and share (default). Non-singleton entries
    /// construct fresh on every `get`.
    pub singleton: bool,
    /// Defer construction until first `get` (default). Non-lazy singleton
    /// factories construct during `register`.
    pub lazy: bool,
    /// Names of services injected into the factory.
    pub dependencies: Vec<String>,
    /// Free-form metadata, visible through `metadata(name)`.
    pub metadata: HashMap<String, Value>,
    /// Optional post-construction hook.
    pub initialize: Option<InitializeFn>,
    /// Optional health probe.
    pub health_check: Option<HealthCheckFn>,
    /// Optional teardown hook.
    pub dispose: Option<DisposeFn>,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            singleton: true,
            lazy: true,
            dependencies: Vec::new(),
            metadata: HashMap::new(),
            initialize: None,
            health_check: None,
            dispose: None,
        }
    }
}

impl ServiceOptions {
    /// Default options: lazy singleton, no dependencies, no hooks.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct a fresh value on every `get`.
    pub fn transient(mut self) -> Self {
        self.singleton = false;
        self
    }

    /// Construct immediately at registration.
    pub fn eager(mut self) -> Self {
        self.lazy = false;
        self
    }

    /// Declare dependency names injected into the factory.
    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Attach a metadata key/value pair.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach a post-construction hook.
    pub fn with_initialize(mut self, hook: InitializeFn) -> Self {
        self.initialize = Some(hook);
        self
    }

    /// Attach a health probe.
    pub fn with_health_check(mut self, hook: HealthCheckFn) -> Self {
        self.health_check = Some(hook);
        self
    }

    /// Attach a teardown hook.
    pub fn with_dispose(mut self, hook: DisposeFn) -> Self {
        self.dispose = Some(hook);
        self
    }
}

impl std::fmt::Debug for ServiceOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceOptions")
            .field("singleton", &self.singleton)
            .field("lazy", &self.lazy)
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// Result of a single service health probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the probe passed.
    pub healthy: bool,
    /// Probe failure message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthStatus {
    /// A passing status.
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            error: None,
        }
    }

    /// A failing status with a reason.
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            error: Some(error.into()),
        }
    }
}

/// Service registry errors
#[derive(Debug, Clone, Error)]
pub enum RegistryError {
    #[error("Invalid service name: {0:?} (must be non-empty)")]
    InvalidName(String),

    #[error("Invalid definition for service {name}: {reason}")]
    InvalidDefinition { name: String, reason: String },

    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Service not found: {name} (known services: {})", known.join(", "))]
    NotFound { name: String, known: Vec<String> },

    #[error("Failed to construct service {name}: {reason}")]
    ConstructionFailed { name: String, reason: String },

    #[error("Service {name} has type {expected:?}, downcast failed")]
    TypeMismatch { name: String, expected: &'static str },

    #[error("Timed out waiting {waited_ms}ms for service {name}")]
    WaitTimeout { name: String, waited_ms: u64 },

    #[error("Service registry is disposed")]
    Disposed,
}
