//! Per-module lifecycle metrics
//!
//! Observational only: timings and error counts recorded as a side effect of
//! lifecycle operations. Nothing in the runtime reads these back for
//! correctness decisions.

use serde::Serialize;
use std::time::Instant;

/// Lifecycle stage being timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Load,
    Initialize,
    Activate,
    Deactivate,
    Dispose,
}

impl Stage {
    /// Stable name used in wrapped errors and metric keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Load => "load",
            Stage::Initialize => "initialize",
            Stage::Activate => "activate",
            Stage::Deactivate => "deactivate",
            Stage::Dispose => "dispose",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timings and error counts for one module.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModuleMetrics {
    /// Milliseconds spent in each completed stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initialize_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activate_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deactivate_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dispose_ms: Option<u64>,
    /// Lifecycle failures observed for this module
    pub error_count: u64,
    /// Most recent failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Unix ms when the module last reached `Active`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<u64>,
    /// Number of times the module was (re)loaded
    pub load_count: u64,
}

impl ModuleMetrics {
    /// Record a completed stage duration.
    pub fn record_stage(&mut self, stage: Stage, started: Instant) {
        let ms = started.elapsed().as_millis() as u64;
        match stage {
            Stage::Load => self.load_ms = Some(ms),
            Stage::Initialize => self.initialize_ms = Some(ms),
            Stage::Activate => self.activate_ms = Some(ms),
            Stage::Deactivate => self.deactivate_ms = Some(ms),
            Stage::Dispose => self.dispose_ms = Some(ms),
        }
    }

    /// Record a lifecycle failure.
    pub fn record_error(&mut self, error: impl std::fmt::Display) {
        self.error_count += 1;
        self.last_error = Some(error.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_stage_and_error() {
        let mut metrics = ModuleMetrics::default();
        metrics.record_stage(Stage::Initialize, Instant::now());
        assert!(metrics.initialize_ms.is_some());
        assert!(metrics.load_ms.is_none());

        metrics.record_error("boom");
        metrics.record_error("again");
        assert_eq!(metrics.error_count, 2);
        assert_eq!(metrics.last_error.as_deref(), Some("again"));
    }

    #[test]
    fn test_serializes_without_unset_fields() {
        let metrics = ModuleMetrics::default();
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json.get("load_ms").is_none());
        assert_eq!(json["error_count"], 0);
    }
}
