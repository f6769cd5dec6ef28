//! Module loader: lifecycle orchestration
//!
//! Drives every module through the staged lifecycle, resolves declared
//! dependencies against loaded modules and the service registry, publishes
//! module APIs, coalesces concurrent loads of the same name, and tears the
//! whole set down in reverse load order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt, Shared};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::event::{topics, Event, EventBus, SubscriptionId};
use crate::module::contract::{Module, ModuleContext, ModuleDescriptor, ModuleError, ModuleState};
use crate::module::metrics::{ModuleMetrics, Stage};
use crate::module::version;
use crate::registry::{ServiceDefinition, ServiceOptions, ServiceRegistry, ServiceValue};
use crate::utils::current_timestamp_ms;
use crate::utils::graph::{find_cycle, topological_order, DependencyGraph};

/// Options for a single `load_module` call.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Replace an existing incarnation instead of returning it.
    pub reload: bool,
    /// Stop at `Initialized`; activation happens later on demand.
    pub lazy: bool,
    /// Module configuration, surfaced through the context.
    pub config: Value,
}

/// A loaded module instance owned by the loader.
pub struct ModuleHandle {
    module: Arc<dyn Module>,
    descriptor: ModuleDescriptor,
    state: RwLock<ModuleState>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl ModuleHandle {
    fn new(module: Arc<dyn Module>) -> Arc<Self> {
        let descriptor = module.descriptor().clone();
        Arc::new(Self {
            module,
            descriptor,
            state: RwLock::new(ModuleState::Loading),
            subscriptions: Mutex::new(Vec::new()),
        })
    }

    /// The module instance.
    pub fn module(&self) -> &Arc<dyn Module> {
        &self.module
    }

    /// Descriptor captured at load time.
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ModuleState {
        *self.state.read().expect("state lock poisoned")
    }

    fn set_state(&self, state: ModuleState) {
        *self.state.write().expect("state lock poisoned") = state;
    }

    fn take_subscriptions(&self) -> Vec<SubscriptionId> {
        std::mem::take(&mut *self.subscriptions.lock().expect("subscription lock poisoned"))
    }
}

impl std::fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("name", &self.descriptor.name)
            .field("version", &self.descriptor.version)
            .field("state", &self.state())
            .finish()
    }
}

type LoadResult = Result<Arc<ModuleHandle>, ModuleError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

struct LoaderInner {
    registry: Arc<ServiceRegistry>,
    bus: Arc<EventBus>,
    /// Loaded modules by name
    modules: RwLock<HashMap<String, Arc<ModuleHandle>>>,
    /// In-flight loads; concurrent loads of one name share one future
    pending: Mutex<HashMap<String, SharedLoad>>,
    /// Declared dependency edges of loaded modules
    graph: Mutex<DependencyGraph>,
    /// Names in first-load order (topological tie-break)
    load_sequence: Mutex<Vec<String>>,
    /// Global load order, dependencies first; recomputed on load/unload
    load_order: Mutex<Vec<String>>,
    metrics: Mutex<HashMap<String, ModuleMetrics>>,
    disposed: AtomicBool,
}

/// Orchestrates the full module lifecycle.
///
/// Cheap to clone; clones share the same module table.
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<LoaderInner>,
}

impl ModuleLoader {
    /// Create a loader bound to a registry and an event bus.
    pub fn new(registry: Arc<ServiceRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                registry,
                bus,
                modules: RwLock::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                graph: Mutex::new(DependencyGraph::new()),
                load_sequence: Mutex::new(Vec::new()),
                load_order: Mutex::new(Vec::new()),
                metrics: Mutex::new(HashMap::new()),
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Load a module and drive it to `Active` (or `Initialized` when lazy).
    ///
    /// Loads of a name already in flight are coalesced onto the single
    /// attempt: every caller gets the same result and no duplicate instance
    /// is created. Loading a name that is already `Active` without
    /// `options.reload` returns the existing handle unchanged.
    pub async fn load_module(
        &self,
        module: Arc<dyn Module>,
        options: LoadOptions,
    ) -> LoadResult {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(ModuleError::Disposed);
        }
        let name = module.descriptor().name.clone();

        if !options.reload {
            let existing = self
                .inner
                .modules
                .read()
                .expect("module table lock poisoned")
                .get(&name)
                .cloned();
            if let Some(handle) = existing {
                if handle.state() == ModuleState::Active {
                    debug!("Module {} already active, returning existing instance", name);
                    return Ok(handle);
                }
            }
        }

        let (load, created) = {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            if let Some(load) = pending.get(&name) {
                (load.clone(), false)
            } else {
                let inner = Arc::clone(&self.inner);
                let load: SharedLoad = LoaderInner::perform_load(inner, module, options)
                    .boxed()
                    .shared();
                pending.insert(name.clone(), load.clone());
                (load, true)
            }
        };

        let result = load.clone().await;

        if created {
            let mut pending = self.inner.pending.lock().expect("pending lock poisoned");
            if pending.get(&name).is_some_and(|p| p.ptr_eq(&load)) {
                pending.remove(&name);
            }
        }
        result
    }

    /// Activate an initialized or inactive module.
    ///
    /// Legal only from `Initialized` or `Inactive`; `Active` is an idempotent
    /// no-op, anything else is `InvalidTransition`.
    pub async fn activate_module(&self, name: &str) -> Result<(), ModuleError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(ModuleError::Disposed);
        }
        let handle = self
            .get_module(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        match handle.state() {
            ModuleState::Active => return Ok(()),
            ModuleState::Initialized | ModuleState::Inactive => {}
            from => {
                return Err(ModuleError::InvalidTransition {
                    module: name.to_string(),
                    from,
                    to: ModuleState::Active,
                })
            }
        }

        LoaderInner::run_activation(&self.inner, &handle).await
    }

    /// Deactivate an active module. From any other state this is a no-op.
    pub async fn deactivate_module(&self, name: &str) -> Result<(), ModuleError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(ModuleError::Disposed);
        }
        let handle = self
            .get_module(name)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;

        if handle.state() != ModuleState::Active {
            debug!("Module {} is not active, deactivation is a no-op", name);
            return Ok(());
        }
        LoaderInner::run_deactivation(&self.inner, &handle).await
    }

    /// Unload a module: deactivate if active, dispose, remove event
    /// subscriptions and dependency edges, tombstone its registry entry.
    pub async fn unload_module(&self, name: &str) -> Result<(), ModuleError> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(ModuleError::Disposed);
        }
        LoaderInner::perform_unload(&self.inner, name).await
    }

    /// Hot-swap a module: snapshot the outgoing instance's state, unload it,
    /// load the replacement, and restore the snapshot if accepted.
    pub async fn reload_module(&self, replacement: Arc<dyn Module>) -> LoadResult {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(ModuleError::Disposed);
        }
        let name = replacement.descriptor().name.clone();
        info!("Reloading module: {}", name);

        let snapshot = match self.get_module(&name) {
            Some(outgoing) => {
                let snapshot = outgoing.module().snapshot().await;
                LoaderInner::perform_unload(&self.inner, &name).await?;
                snapshot
            }
            None => None,
        };

        let handle = self
            .load_module(
                Arc::clone(&replacement),
                LoadOptions {
                    reload: true,
                    ..LoadOptions::default()
                },
            )
            .await?;

        if let Some(state) = snapshot {
            if let Err(e) = handle.module().restore(state).await {
                warn!("Module {} rejected restored state: {}", name, e);
                self.inner.record_error(&name, &e);
                self.inner
                    .publish_scoped(handle.descriptor(), "error", serde_json::json!({
                        "reason": e.to_string(),
                    }))
                    .await;
            }
        }
        Ok(handle)
    }

    /// Dispose the loader: unload every module in exact reverse load order,
    /// so dependents are torn down before their dependencies. Terminal.
    pub async fn dispose(&self) -> Result<(), ModuleError> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Err(ModuleError::Disposed);
        }
        let order: Vec<String> = {
            let order = self.inner.load_order.lock().expect("load order lock poisoned");
            order.iter().rev().cloned().collect()
        };
        info!("Disposing module loader ({} modules)", order.len());

        for name in order {
            if let Err(e) = LoaderInner::perform_unload(&self.inner, &name).await {
                warn!("Error unloading module {} during disposal: {}", name, e);
            }
        }
        Ok(())
    }

    /// Handle of a loaded module.
    pub fn get_module(&self, name: &str) -> Option<Arc<ModuleHandle>> {
        self.inner
            .modules
            .read()
            .expect("module table lock poisoned")
            .get(name)
            .cloned()
    }

    /// Current lifecycle state of a module, `Unloaded` when unknown.
    pub fn module_state(&self, name: &str) -> ModuleState {
        self.get_module(name)
            .map(|h| h.state())
            .unwrap_or(ModuleState::Unloaded)
    }

    /// Names of loaded modules in global load order (dependencies first).
    pub fn load_order(&self) -> Vec<String> {
        self.inner
            .load_order
            .lock()
            .expect("load order lock poisoned")
            .clone()
    }

    /// Declared dependency edges of loaded modules.
    pub fn dependency_graph(&self) -> DependencyGraph {
        self.inner.graph.lock().expect("graph lock poisoned").clone()
    }

    /// Lifecycle metrics for one module. Survives unload.
    pub fn module_metrics(&self, name: &str) -> Option<ModuleMetrics> {
        self.inner
            .metrics
            .lock()
            .expect("metrics lock poisoned")
            .get(name)
            .cloned()
    }

    /// Lifecycle metrics for every module ever loaded.
    pub fn all_metrics(&self) -> HashMap<String, ModuleMetrics> {
        self.inner.metrics.lock().expect("metrics lock poisoned").clone()
    }

    /// Run every loaded module's health probe.
    pub async fn perform_health_checks(&self) -> HashMap<String, Result<(), String>> {
        let handles: Vec<Arc<ModuleHandle>> = {
            let modules = self.inner.modules.read().expect("module table lock poisoned");
            modules.values().cloned().collect()
        };
        let mut results = HashMap::new();
        for handle in handles {
            let status = handle
                .module()
                .health_check()
                .await
                .map_err(|e| e.to_string());
            results.insert(handle.descriptor().name.clone(), status);
        }
        results
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("load_order", &self.load_order())
            .field("disposed", &self.inner.disposed.load(Ordering::SeqCst))
            .finish()
    }
}

impl LoaderInner {
    /// The single load attempt all concurrent callers share.
    async fn perform_load(
        inner: Arc<LoaderInner>,
        module: Arc<dyn Module>,
        options: LoadOptions,
    ) -> LoadResult {
        let descriptor = module.descriptor().clone();
        let name = descriptor.name.clone();
        let load_start = Instant::now();
        info!("Loading module: {} v{}", name, descriptor.version);

        // Replacing an existing non-active (or reloaded) incarnation: tear
        // the old one down first so there is never partial double state.
        let already_loaded = inner
            .modules
            .read()
            .expect("module table lock poisoned")
            .contains_key(&name);
        if already_loaded {
            Self::perform_unload(&inner, &name).await?;
        }

        let handle = ModuleHandle::new(module);
        let result = Self::drive_load(&inner, &handle, &options).await;

        {
            let mut metrics = inner.metrics.lock().expect("metrics lock poisoned");
            let entry = metrics.entry(name.clone()).or_default();
            entry.load_count += 1;
            entry.record_stage(Stage::Load, load_start);
        }

        match result {
            Ok(()) => {
                info!(
                    "Module {} loaded successfully ({})",
                    name,
                    handle.state()
                );
                Ok(handle)
            }
            Err(e) => {
                let reached = handle.state();
                handle.set_state(ModuleState::Error);
                inner.record_error(&name, &e);
                Self::cleanup_failed(&inner, &handle, reached).await;
                inner
                    .publish_scoped(&descriptor, "error", serde_json::json!({
                        "reason": e.to_string(),
                    }))
                    .await;
                Err(e)
            }
        }
    }

    /// Staged load: validate -> resolve -> initialize -> publish -> activate.
    async fn drive_load(
        inner: &Arc<LoaderInner>,
        handle: &Arc<ModuleHandle>,
        options: &LoadOptions,
    ) -> Result<(), ModuleError> {
        let descriptor = handle.descriptor();
        let name = &descriptor.name;

        // Contract validation is fatal before anything runs
        descriptor.validate()?;

        // Make the module visible (state Loading) and record its edges
        inner
            .modules
            .write()
            .expect("module table lock poisoned")
            .insert(name.clone(), Arc::clone(handle));
        {
            let mut graph = inner.graph.lock().expect("graph lock poisoned");
            graph.insert(
                name.clone(),
                descriptor.dependencies.iter().map(|d| d.name.clone()).collect(),
            );
            let mut sequence = inner.load_sequence.lock().expect("sequence lock poisoned");
            if !sequence.contains(name) {
                sequence.push(name.clone());
            }
        }

        // Cycle detection runs before any dependency await or hook
        {
            let graph = inner.graph.lock().expect("graph lock poisoned");
            if let Some(chain) = find_cycle(&graph, name) {
                return Err(ModuleError::CircularDependency { chain });
            }
        }

        let resolved = Self::resolve_dependencies(inner, descriptor).await?;
        handle.set_state(ModuleState::Loaded);

        // Initialize with the narrow platform reference
        handle.set_state(ModuleState::Initializing);
        let context = ModuleContext::new(
            name.clone(),
            descriptor.version.clone(),
            Arc::clone(&inner.registry),
            Arc::clone(&inner.bus),
            resolved,
            options.config.clone(),
        );
        let init_start = Instant::now();
        handle
            .module()
            .initialize(&context)
            .await
            .map_err(|e| ModuleError::HookFailed {
                module: name.clone(),
                hook: Stage::Initialize,
                reason: e.to_string(),
            })?;
        inner.record_stage(name, Stage::Initialize, init_start);
        handle.set_state(ModuleState::Initialized);
        inner
            .publish_scoped(descriptor, "initialized", Value::Null)
            .await;

        // Publish the capability surface so later modules can depend on it
        if let Some(api) = handle.module().api() {
            inner
                .registry
                .register(
                    name.clone(),
                    ServiceDefinition::Instance(api),
                    ServiceOptions::new()
                        .with_metadata("module", Value::Bool(true))
                        .with_metadata("version", Value::String(descriptor.version.clone())),
                )
                .map_err(|e| ModuleError::LoadFailed {
                    module: name.clone(),
                    stage: "publish-api",
                    reason: e.to_string(),
                })?;
        }

        // Install declared event subscriptions
        {
            let mut ids = handle
                .subscriptions
                .lock()
                .expect("subscription lock poisoned");
            for (topic, event_handler) in handle.module().event_handlers() {
                ids.push(inner.bus.subscribe(topic, event_handler));
            }
        }

        Self::recompute_load_order(inner);

        if options.lazy {
            debug!("Module {} loaded lazily, staying initialized", name);
            return Ok(());
        }
        Self::run_activation(inner, handle).await
    }

    /// Resolve declared dependencies against loaded modules and the registry.
    async fn resolve_dependencies(
        inner: &Arc<LoaderInner>,
        descriptor: &ModuleDescriptor,
    ) -> Result<HashMap<String, ServiceValue>, ModuleError> {
        let mut resolved = HashMap::new();

        for dep in &descriptor.dependencies {
            // A dependency with a load in flight is awaited: dependencies are
            // fully constructed before their dependents. Self-loads cannot
            // reach here - the cycle check already rejected them.
            let in_flight = inner
                .pending
                .lock()
                .expect("pending lock poisoned")
                .get(&dep.name)
                .cloned();
            if let Some(load) = in_flight {
                // Its failure shows up below as a missing dependency
                let _ = load.await;
            }

            let provider = inner
                .modules
                .read()
                .expect("module table lock poisoned")
                .get(&dep.name)
                .cloned();

            if let Some(provider) = provider {
                if let Some(required) = &dep.version {
                    version::check_compatible(required, &provider.descriptor().version).map_err(
                        |reason| ModuleError::IncompatibleVersion {
                            module: descriptor.name.clone(),
                            dependency: dep.name.clone(),
                            required: required.clone(),
                            provided: provider.descriptor().version.clone(),
                            reason,
                        },
                    )?;
                }
                // Inject the provider's published API when it has one
                if inner.registry.has(&dep.name) {
                    resolved.insert(dep.name.clone(), inner.registry.get(&dep.name)?);
                }
            } else if inner.registry.has(&dep.name) {
                resolved.insert(dep.name.clone(), inner.registry.get(&dep.name)?);
            } else if dep.optional {
                debug!(
                    "Optional dependency {} of module {} unavailable, skipping",
                    dep.name, descriptor.name
                );
            } else {
                return Err(ModuleError::MissingDependency {
                    module: descriptor.name.clone(),
                    dependency: dep.name.clone(),
                });
            }
        }
        Ok(resolved)
    }

    async fn run_activation(
        inner: &Arc<LoaderInner>,
        handle: &Arc<ModuleHandle>,
    ) -> Result<(), ModuleError> {
        let descriptor = handle.descriptor();
        let name = &descriptor.name;

        handle.set_state(ModuleState::Activating);
        let start = Instant::now();
        match handle.module().activate().await {
            Ok(()) => {
                inner.record_stage(name, Stage::Activate, start);
                handle.set_state(ModuleState::Active);
                {
                    let mut metrics = inner.metrics.lock().expect("metrics lock poisoned");
                    metrics.entry(name.clone()).or_default().activated_at =
                        Some(current_timestamp_ms());
                }
                info!("Module {} activated", name);
                inner
                    .bus
                    .publish(Event::new(topics::MODULE_ACTIVATED, inner.envelope(descriptor)))
                    .await;
                inner.publish_scoped(descriptor, "activated", Value::Null).await;
                Ok(())
            }
            Err(e) => {
                handle.set_state(ModuleState::Error);
                let err = ModuleError::HookFailed {
                    module: name.clone(),
                    hook: Stage::Activate,
                    reason: e.to_string(),
                };
                inner.record_error(name, &err);
                inner
                    .publish_scoped(descriptor, "error", serde_json::json!({
                        "reason": err.to_string(),
                    }))
                    .await;
                Err(err)
            }
        }
    }

    async fn run_deactivation(
        inner: &Arc<LoaderInner>,
        handle: &Arc<ModuleHandle>,
    ) -> Result<(), ModuleError> {
        let descriptor = handle.descriptor();
        let name = &descriptor.name;

        handle.set_state(ModuleState::Deactivating);
        let start = Instant::now();
        match handle.module().deactivate().await {
            Ok(()) => {
                inner.record_stage(name, Stage::Deactivate, start);
                handle.set_state(ModuleState::Inactive);
                info!("Module {} deactivated", name);
                inner
                    .bus
                    .publish(Event::new(
                        topics::MODULE_DEACTIVATED,
                        inner.envelope(descriptor),
                    ))
                    .await;
                inner
                    .publish_scoped(descriptor, "deactivated", Value::Null)
                    .await;
                Ok(())
            }
            Err(e) => {
                handle.set_state(ModuleState::Error);
                let err = ModuleError::HookFailed {
                    module: name.clone(),
                    hook: Stage::Deactivate,
                    reason: e.to_string(),
                };
                inner.record_error(name, &err);
                Err(err)
            }
        }
    }

    async fn perform_unload(inner: &Arc<LoaderInner>, name: &str) -> Result<(), ModuleError> {
        let handle = inner
            .modules
            .read()
            .expect("module table lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))?;
        info!("Unloading module: {}", name);

        // Deactivation failure must not leave the module half-unloaded
        if handle.state() == ModuleState::Active {
            if let Err(e) = Self::run_deactivation(inner, &handle).await {
                warn!("Deactivate during unload of {} failed: {}", name, e);
            }
        }

        let start = Instant::now();
        if let Err(e) = handle.module().dispose().await {
            warn!("Dispose hook of module {} failed: {}", name, e);
            inner.record_error(name, &e);
        } else {
            inner.record_stage(name, Stage::Dispose, start);
        }
        handle.set_state(ModuleState::Disposed);

        Self::detach(inner, &handle);

        inner
            .bus
            .publish(Event::new(
                topics::MODULE_UNLOADED,
                inner.envelope(handle.descriptor()),
            ))
            .await;
        inner
            .publish_scoped(handle.descriptor(), "disposed", Value::Null)
            .await;
        Ok(())
    }

    /// Remove a module's bookkeeping: table entry, subscriptions, graph
    /// edges, and tombstone the registry entry the module published. The
    /// registry intentionally has no removal primitive, so holders of a
    /// resolved API keep it.
    fn detach(inner: &Arc<LoaderInner>, handle: &Arc<ModuleHandle>) {
        let name = &handle.descriptor().name;

        for id in handle.take_subscriptions() {
            inner.bus.unsubscribe(id);
        }

        inner
            .modules
            .write()
            .expect("module table lock poisoned")
            .remove(name);
        {
            let mut graph = inner.graph.lock().expect("graph lock poisoned");
            graph.remove(name);
            let mut sequence = inner.load_sequence.lock().expect("sequence lock poisoned");
            sequence.retain(|n| n != name);
        }
        Self::recompute_load_order(inner);

        // Only an entry carrying the module marker was published by a load;
        // a failed load that never published must not tombstone an unrelated
        // service sharing the name.
        let published = inner
            .registry
            .metadata(name)
            .is_some_and(|m| m.get("module").and_then(Value::as_bool).unwrap_or(false));
        if published {
            inner
                .registry
                .set_metadata(name, "disposed", Value::Bool(true));
        }
    }

    /// Best-effort cleanup after a failed load: never leaves a partially
    /// registered module behind. `reached` is the state at the moment of
    /// failure; dispose only runs when initialization actually started.
    async fn cleanup_failed(
        inner: &Arc<LoaderInner>,
        handle: &Arc<ModuleHandle>,
        reached: ModuleState,
    ) {
        let name = handle.descriptor().name.clone();
        debug!("Cleaning up after failed load of module {}", name);

        if matches!(
            reached,
            ModuleState::Initializing
                | ModuleState::Initialized
                | ModuleState::Activating
                | ModuleState::Error
        ) {
            if let Err(e) = handle.module().dispose().await {
                debug!("Dispose during cleanup of {} failed: {}", name, e);
            }
        }
        Self::detach(inner, handle);
    }

    fn recompute_load_order(inner: &Arc<LoaderInner>) {
        let graph = inner.graph.lock().expect("graph lock poisoned");
        let sequence = inner.load_sequence.lock().expect("sequence lock poisoned");
        match topological_order(&graph, &sequence) {
            Ok(order) => {
                *inner.load_order.lock().expect("load order lock poisoned") = order;
            }
            // Cyclic graphs are rejected before modules are recorded
            Err(chain) => {
                warn!(
                    "Load order recomputation found a cycle: {}",
                    chain.join(" -> ")
                );
            }
        }
    }

    fn envelope(&self, descriptor: &ModuleDescriptor) -> Value {
        serde_json::json!({
            "module": descriptor.name,
            "version": descriptor.version,
            "timestamp": current_timestamp_ms(),
        })
    }

    async fn publish_scoped(&self, descriptor: &ModuleDescriptor, suffix: &str, detail: Value) {
        let mut payload = self.envelope(descriptor);
        if !detail.is_null() {
            payload["detail"] = detail;
        }
        self.bus
            .publish(Event::new(
                topics::module_scoped(&descriptor.name, suffix),
                payload,
            ))
            .await;
    }

    fn record_stage(&self, name: &str, stage: Stage, started: Instant) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        metrics
            .entry(name.to_string())
            .or_default()
            .record_stage(stage, started);
    }

    fn record_error(&self, name: &str, error: &dyn std::fmt::Display) {
        let mut metrics = self.metrics.lock().expect("metrics lock poisoned");
        metrics.entry(name.to_string()).or_default().record_error(error);
    }
}
