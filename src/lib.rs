//! Modkit - module runtime for composable interactive applications
//!
//! This crate provides the backbone that loads, wires, and supervises
//! independently developed functional units ("modules") inside a larger
//! application, without the surrounding application logic needing to know
//! how those units are constructed, ordered, or torn down.
//!
//! ## Components
//!
//! - [`event::EventBus`] - publish/subscribe fan-out for lifecycle
//!   notifications
//! - [`module::Module`] - the contract every module implements: identity,
//!   declared dependencies, four lifecycle operations, and optional
//!   capabilities (API surface, event handlers, state snapshots, health)
//! - [`registry::ServiceRegistry`] - dependency-injection container with
//!   cycle rejection, singleton caching, and ordered disposal
//! - [`module::ModuleLoader`] - lifecycle orchestration: staged loading,
//!   dependency resolution, hot-reload, reverse-order teardown
//! - [`platform::Platform`] - one explicitly constructed value owning all of
//!   the above; no ambient globals
//!
//! ## Design principles
//!
//! 1. **Explicit wiring**: collaborators receive references, never look up
//!    an ambient singleton
//! 2. **Capability interfaces**: module validity is a trait bound, not a
//!    runtime scan for method presence
//! 3. **Cooperative coordination**: the runtime suspends only where a module
//!    hook or a dependency's construction is awaited
//! 4. **Containment**: one failing module, health probe, or dispose hook
//!    never blocks the rest
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use modkit::{Platform, ServiceDefinition, ServiceOptions};
//!
//! # async fn run(my_module: Arc<dyn modkit::Module>) -> anyhow::Result<()> {
//! let platform = Platform::new();
//! platform.registry().register(
//!     "logger",
//!     ServiceDefinition::Instance(Arc::new(String::from("log"))),
//!     ServiceOptions::new(),
//! )?;
//! platform.load_module(my_module).await?;
//! platform.dispose().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod event;
pub mod module;
pub mod platform;
pub mod registry;
pub mod utils;

pub use config::PlatformConfig;
pub use event::{Event, EventBus, EventHandler, SubscriptionId};
pub use module::{
    DependencySpec, LoadOptions, Module, ModuleContext, ModuleDescriptor, ModuleError,
    ModuleHandle, ModuleLoader, ModuleMetrics, ModuleState,
};
pub use platform::Platform;
pub use registry::{
    HealthStatus, RegistryError, ServiceDefinition, ServiceOptions, ServiceRegistry, ServiceValue,
};
