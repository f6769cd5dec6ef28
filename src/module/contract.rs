//! Module contract: the capability set every module must satisfy
//!
//! Modules implement the [`Module`] trait - an explicit capability interface,
//! checked at compile time, replacing any runtime scan for method presence.
//! Optional capabilities (API surface, event handlers, state snapshots,
//! health) have inert defaults.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::event::{topics, Event, EventBus, EventHandler};
use crate::module::metrics::Stage;
use crate::module::version;
use crate::registry::{RegistryError, ServiceRegistry, ServiceValue};
use crate::utils::current_timestamp_ms;

/// Module lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleState {
    /// Not yet loaded
    Unloaded,
    /// Load in progress: contract validation and dependency resolution
    Loading,
    /// Dependencies resolved, not yet initialized
    Loaded,
    /// `initialize` hook running
    Initializing,
    /// Initialized; API published, awaiting activation
    Initialized,
    /// `activate` hook running
    Activating,
    /// Fully active
    Active,
    /// `deactivate` hook running
    Deactivating,
    /// Deactivated but still initialized; may be re-activated
    Inactive,
    /// A lifecycle hook failed; module needs unload
    Error,
    /// Disposed; terminal
    Disposed,
}

impl std::fmt::Display for ModuleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModuleState::Unloaded => "unloaded",
            ModuleState::Loading => "loading",
            ModuleState::Loaded => "loaded",
            ModuleState::Initializing => "initializing",
            ModuleState::Initialized => "initialized",
            ModuleState::Activating => "activating",
            ModuleState::Active => "active",
            ModuleState::Deactivating => "deactivating",
            ModuleState::Inactive => "inactive",
            ModuleState::Error => "error",
            ModuleState::Disposed => "disposed",
        };
        f.write_str(s)
    }
}

/// A declared dependency on another module or a registered service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DependencySpec {
    /// Dependency name (module name or service name)
    pub name: String,
    /// Required version ("MAJOR" or "MAJOR.MINOR"); only checked when the
    /// dependency is satisfied by a module
    #[serde(default)]
    pub version: Option<String>,
    /// Skipped silently when unavailable
    #[serde(default)]
    pub optional: bool,
}

impl DependencySpec {
    /// Required dependency without a version constraint.
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            optional: false,
        }
    }

    /// Optional dependency without a version constraint.
    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            optional: true,
        }
    }

    /// Attach a version requirement.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Module identity and declared dependencies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDescriptor {
    /// Module name (unique key)
    pub name: String,
    /// Module version (semantic versioning, "MAJOR.MINOR.PATCH")
    pub version: String,
    /// Declared dependencies, in resolution order
    #[serde(default)]
    pub dependencies: Vec<DependencySpec>,
}

impl ModuleDescriptor {
    /// Create a descriptor with no dependencies.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            dependencies: Vec::new(),
        }
    }

    /// Add a dependency.
    pub fn with_dependency(mut self, dep: DependencySpec) -> Self {
        self.dependencies.push(dep);
        self
    }

    /// Validate name and version shape. Checked before any lifecycle hook
    /// runs; failures are fatal `InvalidModule`.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.name.trim().is_empty() {
            return Err(ModuleError::InvalidModule(
                "module name cannot be empty".to_string(),
            ));
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ModuleError::InvalidModule(format!(
                "invalid module name {:?} (must be alphanumeric with dashes/underscores)",
                self.name
            )));
        }
        if version::parse(&self.version).is_none() {
            return Err(ModuleError::InvalidModule(format!(
                "invalid version {:?} for module {} (expected MAJOR.MINOR.PATCH)",
                self.version, self.name
            )));
        }
        for dep in &self.dependencies {
            if dep.name.trim().is_empty() {
                return Err(ModuleError::InvalidModule(format!(
                    "module {} declares a dependency with an empty name",
                    self.name
                )));
            }
            if let Some(required) = &dep.version {
                if version::parse_requirement(required).is_none() {
                    return Err(ModuleError::InvalidModule(format!(
                        "module {} declares invalid version requirement {:?} on {}",
                        self.name, required, dep.name
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Module trait that all modules must implement
///
/// The four lifecycle operations are driven by the loader in a fixed order;
/// a module never calls its own hooks. All hooks may suspend - that is the
/// only place the runtime awaits module code.
#[async_trait]
pub trait Module: Send + Sync {
    /// Identity and declared dependencies. Must be stable for the lifetime
    /// of the instance.
    fn descriptor(&self) -> &ModuleDescriptor;

    /// Prepare for operation. Resolved dependencies are available through
    /// the context; the API surface is published after this succeeds.
    async fn initialize(&self, context: &ModuleContext) -> Result<(), ModuleError>;

    /// Begin doing work. Only called from `Initialized` or `Inactive`.
    async fn activate(&self) -> Result<(), ModuleError>;

    /// Stop doing work, keep state. Only called from `Active`.
    async fn deactivate(&self) -> Result<(), ModuleError>;

    /// Release resources. Terminal; the instance is dropped afterwards.
    async fn dispose(&self) -> Result<(), ModuleError>;

    /// Capability surface published into the service registry under the
    /// module's name once `initialize` succeeds.
    fn api(&self) -> Option<ServiceValue> {
        None
    }

    /// Event subscriptions the loader installs on load and removes on
    /// unload: `(topic, handler)` pairs.
    fn event_handlers(&self) -> Vec<(String, EventHandler)> {
        Vec::new()
    }

    /// Snapshot of module-owned state for hot-reload.
    async fn snapshot(&self) -> Option<Value> {
        None
    }

    /// Restore a snapshot captured from a previous incarnation.
    async fn restore(&self, _state: Value) -> Result<(), ModuleError> {
        Ok(())
    }

    /// On-demand liveness probe.
    async fn health_check(&self) -> Result<(), ModuleError> {
        Ok(())
    }
}

/// Narrow platform reference handed to a module at `initialize`.
///
/// This is the only handle a module holds on the runtime: resolved
/// dependencies, service lookup, and event emission. Modules never own the
/// registry or the loader.
#[derive(Clone)]
pub struct ModuleContext {
    module_name: String,
    module_version: String,
    registry: Arc<ServiceRegistry>,
    bus: Arc<EventBus>,
    resolved: HashMap<String, ServiceValue>,
    config: Value,
}

impl ModuleContext {
    pub(crate) fn new(
        module_name: String,
        module_version: String,
        registry: Arc<ServiceRegistry>,
        bus: Arc<EventBus>,
        resolved: HashMap<String, ServiceValue>,
        config: Value,
    ) -> Self {
        Self {
            module_name,
            module_version,
            registry,
            bus,
            resolved,
            config,
        }
    }

    /// Name of the module this context belongs to.
    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// Module configuration passed at load, `Value::Null` when absent.
    pub fn config(&self) -> &Value {
        &self.config
    }

    /// A resolved declared dependency, keyed by its declared name. Absent
    /// for optional dependencies that were skipped and for modules that
    /// publish no API.
    pub fn dependency(&self, name: &str) -> Option<ServiceValue> {
        self.resolved.get(name).cloned()
    }

    /// Typed access to a resolved dependency.
    pub fn dependency_as<T: Send + Sync + 'static>(&self, name: &str) -> Option<Arc<T>> {
        self.resolved
            .get(name)
            .cloned()
            .and_then(|v| v.downcast::<T>().ok())
    }

    /// Look up any registered service, not just declared dependencies.
    pub fn get_service(&self, name: &str) -> Result<ServiceValue, RegistryError> {
        self.registry.get(name)
    }

    /// Publish a module-scoped event (`module:<name>:<suffix>`) carrying the
    /// standard envelope plus `detail`.
    pub async fn emit(&self, suffix: &str, detail: Value) {
        let topic = topics::module_scoped(&self.module_name, suffix);
        self.bus
            .publish(Event::new(
                topic,
                serde_json::json!({
                    "module": self.module_name,
                    "version": self.module_version,
                    "timestamp": current_timestamp_ms(),
                    "detail": detail,
                }),
            ))
            .await;
    }

    /// Publish on an arbitrary topic.
    pub async fn publish(&self, topic: &str, payload: Value) {
        self.bus.publish(Event::new(topic, payload)).await;
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.module_name)
            .field("resolved", &self.resolved.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Module system errors
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    #[error("Invalid module: {0}")]
    InvalidModule(String),

    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Module {module} requires missing dependency: {dependency}")]
    MissingDependency { module: String, dependency: String },

    #[error("Module {module} requires {dependency} {required}, provider has {provided}: {reason}")]
    IncompatibleVersion {
        module: String,
        dependency: String,
        required: String,
        provided: String,
        reason: String,
    },

    #[error("Invalid lifecycle transition for module {module}: {from} -> {to}")]
    InvalidTransition {
        module: String,
        from: ModuleState,
        to: ModuleState,
    },

    #[error("Module not found: {0}")]
    NotFound(String),

    #[error("Module {module} {hook} hook failed: {reason}")]
    HookFailed {
        module: String,
        hook: Stage,
        reason: String,
    },

    #[error("Loading module {module} failed at stage {stage}: {reason}")]
    LoadFailed {
        module: String,
        stage: &'static str,
        reason: String,
    },

    #[error("Module loader is disposed")]
    Disposed,

    #[error("Module operation failed: {0}")]
    OperationError(String),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl From<anyhow::Error> for ModuleError {
    fn from(e: anyhow::Error) -> Self {
        ModuleError::OperationError(e.to_string())
    }
}
