//! Module system: contract, versioning, metrics, and the loader
//!
//! A module is a self-contained functional unit with a name, a version, and
//! a declared dependency list, managed through a fixed lifecycle:
//!
//! `Unloaded -> Loading -> Loaded -> Initializing -> Initialized
//!  [-> Activating -> Active -> Deactivating -> Inactive] -> Disposed`
//!
//! The loader owns all module instances; modules receive only a narrow
//! [`ModuleContext`] and never see the loader or the full registry surface
//! they did not ask for.

pub mod contract;
pub mod loader;
pub mod metrics;
pub mod version;

pub use contract::{
    DependencySpec, Module, ModuleContext, ModuleDescriptor, ModuleError, ModuleState,
};
pub use loader::{LoadOptions, ModuleHandle, ModuleLoader};
pub use metrics::{ModuleMetrics, Stage};
