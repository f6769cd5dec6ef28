//! Configuration for the platform runtime
//!
//! Handles configuration defaults, validation, and loading from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::module::ModuleError;

/// Platform runtime configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Log filter applied when RUST_LOG is unset (e.g. "info",
    /// "modkit=debug")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Poll interval for deferred service resolution, in milliseconds
    #[serde(default = "default_wait_poll_ms")]
    pub service_wait_poll_ms: u64,

    /// Default timeout for deferred service resolution, in milliseconds
    #[serde(default = "default_wait_timeout_ms")]
    pub service_wait_timeout_ms: u64,
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_wait_poll_ms() -> u64 {
    20
}

fn default_wait_timeout_ms() -> u64 {
    5_000
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            service_wait_poll_ms: default_wait_poll_ms(),
            service_wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

impl PlatformConfig {
    /// Load configuration from a TOML file. Missing keys take defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModuleError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ModuleError::OperationError(format!("Failed to read config file: {}", e))
        })?;
        let config: PlatformConfig = toml::from_str(&contents).map_err(|e| {
            ModuleError::OperationError(format!("Failed to parse config TOML: {}", e))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject nonsensical values before they reach the runtime.
    pub fn validate(&self) -> Result<(), ModuleError> {
        if self.service_wait_poll_ms == 0 {
            return Err(ModuleError::OperationError(
                "service_wait_poll_ms must be non-zero".to_string(),
            ));
        }
        if self.service_wait_timeout_ms < self.service_wait_poll_ms {
            return Err(ModuleError::OperationError(
                "service_wait_timeout_ms must be >= service_wait_poll_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Poll interval as a [`Duration`].
    pub fn service_wait_poll(&self) -> Duration {
        Duration::from_millis(self.service_wait_poll_ms)
    }

    /// Default wait timeout as a [`Duration`].
    pub fn service_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.service_wait_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PlatformConfig::default();
        assert_eq!(config.log_filter, "info");
        assert_eq!(config.service_wait_poll_ms, 20);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_partial_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "service_wait_timeout_ms = 250").unwrap();

        let config = PlatformConfig::from_file(file.path()).unwrap();
        assert_eq!(config.service_wait_timeout_ms, 250);
        assert_eq!(config.service_wait_poll_ms, 20); // default
    }

    #[test]
    fn test_validate_rejects_zero_poll() {
        let config = PlatformConfig {
            service_wait_poll_ms: 0,
            ..PlatformConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
