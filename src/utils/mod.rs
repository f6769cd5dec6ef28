//! Utility modules shared across the runtime

pub mod graph;
pub mod logging;
pub mod time;

// Re-export commonly used items
pub use graph::{find_cycle, topological_order, DependencyGraph};
pub use logging::{init_logging, try_init_logging};
pub use time::current_timestamp_ms;
