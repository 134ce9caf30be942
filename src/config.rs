use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunable parameters for a tracking instance.
///
/// The filter thresholds were tuned empirically for consumer GPS; they are
/// exposed here rather than hardcoded so callers can recalibrate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Reject a fix whose incremental distance from the last accepted fix
    /// is at or above this many meters
    pub max_jump_m: f64,
    /// Reject a fix whose reported horizontal accuracy is at or above this
    /// many meters (fixes without an accuracy report are never rejected
    /// for accuracy)
    pub max_accuracy_m: f64,
    /// Metabolic equivalent used for the calorie estimate
    pub met: f64,
    /// Body weight in kilograms, supplied by the caller's profile
    pub body_weight_kg: f64,
    /// How long `start()` waits for the first fix
    pub first_fix_timeout: Duration,
    /// Tick scheduler period
    pub tick_interval: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_jump_m: 100.0,
            max_accuracy_m: 20.0,
            met: 3.8, // moderate walking
            body_weight_kg: 70.0,
            first_fix_timeout: Duration::from_secs(10),
            tick_interval: Duration::from_secs(1),
        }
    }
}

impl TrackerConfig {
    pub fn with_body_weight(mut self, kg: f64) -> Self {
        self.body_weight_kg = kg;
        self
    }
}
