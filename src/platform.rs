//! Platform facade
//!
//! One explicitly constructed value owning the event bus, the service
//! registry, and the module loader. There is no ambient global; bootstrap
//! code builds a `Platform` and passes references down to collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::PlatformConfig;
use crate::event::EventBus;
use crate::module::loader::{LoadOptions, ModuleHandle};
use crate::module::{Module, ModuleError, ModuleLoader, ModuleMetrics, ModuleState};
use crate::registry::{RegistryError, ServiceRegistry, ServiceValue};

/// The application platform: one bus, one registry, one loader.
pub struct Platform {
    config: PlatformConfig,
    bus: Arc<EventBus>,
    registry: Arc<ServiceRegistry>,
    loader: ModuleLoader,
}

impl Platform {
    /// Create a platform with default configuration.
    pub fn new() -> Self {
        Self::with_config(PlatformConfig::default())
    }

    /// Create a platform with explicit configuration.
    pub fn with_config(config: PlatformConfig) -> Self {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ServiceRegistry::new());
        let loader = ModuleLoader::new(Arc::clone(&registry), Arc::clone(&bus));
        Self {
            config,
            bus,
            registry,
            loader,
        }
    }

    /// Runtime configuration.
    pub fn config(&self) -> &PlatformConfig {
        &self.config
    }

    /// The lifecycle event bus.
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The service registry.
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// The module loader.
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }

    /// Load a module with default options (eager activation).
    pub async fn load_module(
        &self,
        module: Arc<dyn Module>,
    ) -> Result<Arc<ModuleHandle>, ModuleError> {
        self.loader.load_module(module, LoadOptions::default()).await
    }

    /// Load a module with explicit options.
    pub async fn load_module_with(
        &self,
        module: Arc<dyn Module>,
        options: LoadOptions,
    ) -> Result<Arc<ModuleHandle>, ModuleError> {
        self.loader.load_module(module, options).await
    }

    /// Unload a module, tearing it down completely.
    pub async fn unload_module(&self, name: &str) -> Result<(), ModuleError> {
        self.loader.unload_module(name).await
    }

    /// Hot-swap a module, preserving its state snapshot when offered.
    pub async fn reload_module(
        &self,
        replacement: Arc<dyn Module>,
    ) -> Result<Arc<ModuleHandle>, ModuleError> {
        self.loader.reload_module(replacement).await
    }

    /// Activate an initialized or inactive module.
    pub async fn activate_module(&self, name: &str) -> Result<(), ModuleError> {
        self.loader.activate_module(name).await
    }

    /// Deactivate an active module.
    pub async fn deactivate_module(&self, name: &str) -> Result<(), ModuleError> {
        self.loader.deactivate_module(name).await
    }

    /// Resolve a registered service.
    pub fn get_service(&self, name: &str) -> Result<ServiceValue, RegistryError> {
        self.registry.get(name)
    }

    /// Resolve a registered service with a concrete type.
    pub fn get_service_as<T: Send + Sync + 'static>(
        &self,
        name: &str,
    ) -> Result<Arc<T>, RegistryError> {
        self.registry.get_as::<T>(name)
    }

    /// Resolve a service, waiting for late registration up to the configured
    /// timeout.
    pub async fn wait_for_service(&self, name: &str) -> Result<ServiceValue, RegistryError> {
        self.registry
            .wait_for_with(
                name,
                self.config.service_wait_poll(),
                self.config.service_wait_timeout(),
            )
            .await
    }

    /// Handle of a loaded module.
    pub fn get_module(&self, name: &str) -> Option<Arc<ModuleHandle>> {
        self.loader.get_module(name)
    }

    /// Lifecycle state of a module, `Unloaded` when unknown.
    pub fn module_state(&self, name: &str) -> ModuleState {
        self.loader.module_state(name)
    }

    /// Lifecycle metrics for one module.
    pub fn get_module_metrics(&self, name: &str) -> Option<ModuleMetrics> {
        self.loader.module_metrics(name)
    }

    /// Lifecycle metrics for all modules ever loaded.
    pub fn get_all_metrics(&self) -> HashMap<String, ModuleMetrics> {
        self.loader.all_metrics()
    }

    /// Dispose the platform: modules first (reverse load order), then the
    /// service registry. Terminal; the platform is unusable afterwards.
    pub async fn dispose(&self) -> Result<(), ModuleError> {
        info!("Disposing platform");
        self.loader.dispose().await?;
        if let Err(e) = self.registry.dispose() {
            // Already-disposed registries are fine during teardown
            warn!("Registry disposal reported: {}", e);
        }
        Ok(())
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Platform")
            .field("modules", &self.loader.load_order())
            .field("services", &self.registry.list())
            .finish()
    }
}
