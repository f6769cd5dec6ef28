//! Event bus for lifecycle notifications
//!
//! The bus is the one component everything else may depend on; it depends on
//! nothing but the clock.

pub mod bus;

pub use bus::{handler, topics, Event, EventBus, EventHandler, SubscriptionId};
