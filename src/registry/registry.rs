//! Service registry implementation
//!
//! Dependency-injection container: named service definitions, recursive
//! dependency resolution, singleton caching, cycle rejection, ordered
//! disposal. Resolution is synchronous bookkeeping; only module lifecycle
//! hooks (in the loader) ever suspend.

use std::collections::HashMap;
use std::sync::RwLock;
use std::thread::ThreadId;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::registry::entry::{
    DisposeFn, HealthCheckFn, HealthStatus, RegistryError, ResolvedServices, ServiceDefinition,
    ServiceOptions, ServiceValue,
};
use crate::utils::graph::{find_cycle, topological_order, DependencyGraph};

/// Poll interval for [`ServiceRegistry::wait_for`].
pub const DEFAULT_WAIT_POLL: Duration = Duration::from_millis(20);

struct ServiceEntry {
    definition: ServiceDefinition,
    options: ServiceOptions,
}

#[derive(Default)]
struct RegistryInner {
    entries: HashMap<String, ServiceEntry>,
    /// Singleton cache: name -> constructed instance
    instances: HashMap<String, ServiceValue>,
    /// Names in registration order (ties in init order follow this)
    registration_order: Vec<String>,
    /// Global initialization order, leaves first; recomputed on register
    init_order: Vec<String>,
    /// Active construction chains, one per thread. A factory calling back
    /// into the registry re-enters on its own thread, so a name reappearing
    /// in that thread's chain is a construction-order cycle.
    constructing: HashMap<ThreadId, Vec<String>>,
    disposed: bool,
}

impl RegistryInner {
    fn graph(&self) -> DependencyGraph {
        self.entries
            .iter()
            .map(|(name, entry)| (name.clone(), entry.options.dependencies.clone()))
            .collect()
    }

    fn known_names(&self) -> Vec<String> {
        self.registration_order.clone()
    }
}

/// Dependency-injection container for named services.
///
/// Interior mutability behind one `RwLock`. User code (factories, initialize
/// hooks, health probes, dispose hooks) always runs with the lock released,
/// so a callback may resolve other services without deadlocking.
#[derive(Default)]
pub struct ServiceRegistry {
    inner: RwLock<RegistryInner>,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service definition under a unique name.
    ///
    /// Fails with `InvalidName` for an empty name, `InvalidDefinition` for an
    /// instance definition marked non-singleton (an instance cannot be
    /// constructed fresh per call), and `CircularDependency` when the new
    /// entry's dependencies would close a cycle with existing entries - in
    /// which case the service table is left unchanged.
    ///
    /// Registering an existing name replaces its definition and drops any
    /// cached instance; holders of the old instance keep it.
    pub fn register(
        &self,
        name: impl Into<String>,
        definition: ServiceDefinition,
        options: ServiceOptions,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        let mut inner = self.inner.write().expect("registry lock poisoned");
        if inner.disposed {
            return Err(RegistryError::Disposed);
        }
        if name.trim().is_empty() {
            return Err(RegistryError::InvalidName(name));
        }
        if !options.singleton && matches!(definition, ServiceDefinition::Instance(_)) {
            return Err(RegistryError::InvalidDefinition {
                name,
                reason: "an instance definition cannot be non-singleton".to_string(),
            });
        }

        // Reject registrations that would close a cycle, before storing
        let mut candidate = inner.graph();
        candidate.insert(name.clone(), options.dependencies.clone());
        if let Some(chain) = find_cycle(&candidate, &name) {
            return Err(RegistryError::CircularDependency { chain });
        }

        let replacing = inner.entries.contains_key(&name);
        inner.instances.remove(&name);
        inner.entries.insert(
            name.clone(),
            ServiceEntry {
                definition,
                options,
            },
        );
        if !replacing {
            inner.registration_order.push(name.clone());
        }

        Self::recompute_init_order(&mut inner)?;

        let eager = {
            let entry = &inner.entries[&name];
            entry.options.singleton && !entry.options.lazy
        };
        drop(inner);

        // Eager singleton factories are constructed as a registration side
        // effect so their failures surface here, not at first use. The lock
        // is released first; the factory may call back into the registry.
        if eager {
            self.resolve(&name)?;
        }

        debug!("Registered service: {}", name);
        Ok(())
    }

    /// Resolve a service by name, constructing it if needed.
    ///
    /// Singleton entries build-and-cache on first access; non-singleton
    /// entries construct fresh on every call.
    pub fn get(&self, name: &str) -> Result<ServiceValue, RegistryError> {
        self.resolve(name)
    }

    /// Resolve a service and downcast it to a concrete type.
    pub fn get_as<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<std::sync::Arc<T>, RegistryError> {
        let value = self.get(name)?;
        value
            .downcast::<T>()
            .map_err(|_| RegistryError::TypeMismatch {
                name: name.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Whether a name is registered. Never constructs.
    pub fn has(&self, name: &str) -> bool {
        let inner = self.inner.read().expect("registry lock poisoned");
        !inner.disposed && inner.entries.contains_key(name)
    }

    /// Resolve a service, waiting for it to be registered if it is not yet.
    ///
    /// Explicit deferred handle with a bounded polling policy: checks every
    /// [`DEFAULT_WAIT_POLL`] until `timeout` elapses, then fails
    /// `WaitTimeout`. Registration order between independent modules is not
    /// guaranteed, so bootstrap code racing a slow module uses this instead
    /// of retry loops.
    pub async fn wait_for(
        &self,
        name: &str,
        timeout: Duration,
    ) -> Result<ServiceValue, RegistryError> {
        self.wait_for_with(name, DEFAULT_WAIT_POLL, timeout).await
    }

    /// [`wait_for`](Self::wait_for) with an explicit poll interval.
    pub async fn wait_for_with(
        &self,
        name: &str,
        poll: Duration,
        timeout: Duration,
    ) -> Result<ServiceValue, RegistryError> {
        let start = std::time::Instant::now();
        loop {
            if self.has(name) {
                return self.get(name);
            }
            {
                let inner = self.inner.read().expect("registry lock poisoned");
                if inner.disposed {
                    return Err(RegistryError::Disposed);
                }
            }
            if start.elapsed() >= timeout {
                return Err(RegistryError::WaitTimeout {
                    name: name.to_string(),
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(poll.min(timeout.saturating_sub(start.elapsed()))).await;
        }
    }

    /// Metadata attached to an entry at registration, if any.
    pub fn metadata(&self, name: &str) -> Option<HashMap<String, Value>> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner
            .entries
            .get(name)
            .map(|entry| entry.options.metadata.clone())
    }

    /// Merge a metadata key into an existing entry. Used by the loader to
    /// tombstone a module's entry on unload - there is no removal primitive,
    /// so holders of a previously resolved singleton keep a valid value.
    pub fn set_metadata(&self, name: &str, key: impl Into<String>, value: Value) -> bool {
        let mut inner = self.inner.write().expect("registry lock poisoned");
        match inner.entries.get_mut(name) {
            Some(entry) => {
                entry.options.metadata.insert(key.into(), value);
                true
            }
            None => false,
        }
    }

    /// All registered names, in registration order.
    pub fn list(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.registration_order.clone()
    }

    /// The declared dependency edges among entries.
    pub fn dependency_graph(&self) -> DependencyGraph {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.graph()
    }

    /// Current global initialization order (dependencies first).
    pub fn initialization_order(&self) -> Vec<String> {
        let inner = self.inner.read().expect("registry lock poisoned");
        inner.init_order.clone()
    }

    /// Run every entry's health probe, resolving instances as needed.
    ///
    /// A failing or panicking resolution becomes `healthy: false` for that
    /// entry rather than propagating - one unhealthy service must not hide
    /// the status of the rest.
    pub fn perform_health_checks(&self) -> HashMap<String, HealthStatus> {
        let checked: Vec<(String, HealthCheckFn)> = {
            let inner = self.inner.read().expect("registry lock poisoned");
            if inner.disposed {
                return HashMap::new();
            }
            inner
                .init_order
                .iter()
                .filter_map(|name| {
                    inner
                        .entries
                        .get(name)
                        .and_then(|e| e.options.health_check.clone())
                        .map(|hook| (name.clone(), hook))
                })
                .collect()
        };

        // Probes run with no lock held; a probe may resolve peer services
        let mut results = HashMap::new();
        for (name, hook) in checked {
            let status = match self.resolve(&name) {
                Ok(instance) => match hook(&instance) {
                    Ok(()) => HealthStatus::healthy(),
                    Err(e) => HealthStatus::unhealthy(e),
                },
                Err(e) => HealthStatus::unhealthy(e.to_string()),
            };
            results.insert(name, status);
        }
        results
    }

    /// Dispose the registry: run dispose hooks in reverse initialization
    /// order, constructed singletons only, then clear all tables and mark the
    /// registry permanently disposed.
    ///
    /// A failing hook is logged and does not block the rest. Never constructs
    /// a service solely to dispose it.
    pub fn dispose(&self) -> Result<(), RegistryError> {
        let hooks: Vec<(String, DisposeFn, ServiceValue)> = {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            if inner.disposed {
                return Err(RegistryError::Disposed);
            }
            info!("Disposing service registry ({} entries)", inner.entries.len());

            let order: Vec<String> = inner.init_order.iter().rev().cloned().collect();
            let mut hooks = Vec::new();
            for name in order {
                let Some(instance) = inner.instances.get(&name).cloned() else {
                    continue; // never constructed, nothing to tear down
                };
                let Some(hook) = inner
                    .entries
                    .get(&name)
                    .and_then(|e| e.options.dispose.clone())
                else {
                    continue;
                };
                hooks.push((name, hook, instance));
            }

            inner.entries.clear();
            inner.instances.clear();
            inner.registration_order.clear();
            inner.init_order.clear();
            inner.constructing.clear();
            inner.disposed = true;
            hooks
        };

        // Hooks run after the registry is marked disposed and with no lock
        // held: a hook touching the registry gets `Disposed`, never a hang.
        for (name, hook, instance) in hooks {
            if let Err(e) = hook(&instance) {
                warn!("Dispose hook for service {} failed: {}", name, e);
            }
        }
        Ok(())
    }

    /// Create a new registry pre-populated with the same definitions but no
    /// singleton instances, for independent resolution.
    pub fn create_scope(&self) -> Result<ServiceRegistry, RegistryError> {
        let inner = self.inner.read().expect("registry lock poisoned");
        if inner.disposed {
            return Err(RegistryError::Disposed);
        }
        let scope = ServiceRegistry::new();
        {
            let mut scope_inner = scope.inner.write().expect("registry lock poisoned");
            for name in &inner.registration_order {
                let entry = &inner.entries[name];
                scope_inner.entries.insert(
                    name.clone(),
                    ServiceEntry {
                        definition: entry.definition.clone(),
                        options: entry.options.clone(),
                    },
                );
                scope_inner.registration_order.push(name.clone());
            }
            scope_inner.init_order = inner.init_order.clone();
        }
        Ok(scope)
    }

    fn recompute_init_order(inner: &mut RegistryInner) -> Result<(), RegistryError> {
        let graph = inner.graph();
        match topological_order(&graph, &inner.registration_order) {
            Ok(order) => {
                inner.init_order = order;
                Ok(())
            }
            // Unreachable in practice: register rejects cycles up front
            Err(chain) => Err(RegistryError::CircularDependency { chain }),
        }
    }

    /// Resolve against the per-thread construction chain kept in registry
    /// state. A name re-entering its thread's active chain is a
    /// construction-order cycle, reported with the full chain - this catches
    /// cycles the registration-time check cannot see (factories pulling
    /// services not declared as dependencies), whether they arrive through
    /// declared edges or through a factory calling `get` directly.
    ///
    /// The entry is snapshotted and the chain extended under the lock; the
    /// factory and initialize hook then run with the lock released.
    fn resolve(&self, name: &str) -> Result<ServiceValue, RegistryError> {
        let thread = std::thread::current().id();

        let (definition, dependencies, singleton, initialize) = {
            let mut inner = self.inner.write().expect("registry lock poisoned");
            if inner.disposed {
                return Err(RegistryError::Disposed);
            }
            if let Some(cached) = inner.instances.get(name) {
                return Ok(cached.clone());
            }
            if let Some(chain) = inner.constructing.get(&thread) {
                if chain.iter().any(|n| n == name) {
                    let mut chain = chain.clone();
                    chain.push(name.to_string());
                    return Err(RegistryError::CircularDependency { chain });
                }
            }
            let Some(entry) = inner.entries.get(name) else {
                return Err(RegistryError::NotFound {
                    name: name.to_string(),
                    known: inner.known_names(),
                });
            };

            let snapshot = (
                entry.definition.clone(),
                entry.options.dependencies.clone(),
                entry.options.singleton,
                entry.options.initialize.clone(),
            );
            inner
                .constructing
                .entry(thread)
                .or_default()
                .push(name.to_string());
            snapshot
        };

        let result = (|| {
            let mut resolved = ResolvedServices::new();
            for dep in &dependencies {
                resolved.insert(dep.clone(), self.resolve(dep)?);
            }

            let instance = match definition {
                ServiceDefinition::Instance(value) => value,
                ServiceDefinition::Factory(factory) => factory(&resolved)?,
            };

            if let Some(hook) = initialize {
                hook(&instance).map_err(|reason| RegistryError::ConstructionFailed {
                    name: name.to_string(),
                    reason,
                })?;
            }
            Ok(instance)
        })();

        let mut inner = self.inner.write().expect("registry lock poisoned");
        let chain_done = inner
            .constructing
            .get_mut(&thread)
            .map(|chain| {
                chain.pop();
                chain.is_empty()
            })
            .unwrap_or(true);
        if chain_done {
            inner.constructing.remove(&thread);
        }

        let instance = result?;
        if inner.disposed {
            return Err(RegistryError::Disposed);
        }
        if singleton {
            // First construction wins if a concurrent resolve raced us here
            if let Some(existing) = inner.instances.get(name) {
                return Ok(existing.clone());
            }
            inner
                .instances
                .insert(name.to_string(), instance.clone());
        }
        Ok(instance)
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read().expect("registry lock poisoned");
        f.debug_struct("ServiceRegistry")
            .field("entries", &inner.registration_order)
            .field("constructed", &inner.instances.len())
            .field("disposed", &inner.disposed)
            .finish()
    }
}
