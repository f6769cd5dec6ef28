//! Logging utilities for consistent logging across the platform and its modules
//!
//! Provides simple logging initialization that:
//! - Respects the RUST_LOG environment variable
//! - Falls back to a filter from [`PlatformConfig`](crate::config::PlatformConfig)
//! - Defaults to "info"
//!
//! # Usage
//!
//! ```rust,no_run
//! use modkit::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize logging for the host application.
///
/// Precedence: RUST_LOG environment variable, then the optional `filter`
/// argument (usually from config), then `"info"`.
///
/// Panics if a global subscriber is already installed; tests should use
/// [`try_init_logging`] instead.
pub fn init_logging(filter: Option<&str>) {
    build_registry(filter).init();
}

/// Initialize logging, ignoring failure if a subscriber is already set.
///
/// Safe to call from multiple tests in the same process.
pub fn try_init_logging(filter: Option<&str>) {
    let _ = build_registry(filter).try_init();
}

fn build_registry(filter: Option<&str>) -> impl SubscriberInitExt {
    // RUST_LOG always takes precedence; config filter fills in when unset.
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(filter.unwrap_or("info"))
    };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true) // Include module path - useful for debugging
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()), // Respect NO_COLOR standard
        )
        .with(env_filter)
}
