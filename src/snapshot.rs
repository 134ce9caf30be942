use serde::{Deserialize, Serialize};
use std::fs;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::geo::GeoFix;
use crate::session::SessionStatus;

/// Live view of an active session, published on every accepted fix, tick,
/// and state transition. Consumed by UI/map collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveSnapshot {
    pub timestamp: f64,
    pub status: SessionStatus,
    pub current_fix: Option<GeoFix>,
    pub elapsed_active_secs: u64,
    pub distance_km: f64,
    pub average_pace_min_per_km: f64,
    pub calories: f64,
    pub route: Vec<GeoFix>,
    pub accepted_fixes: u64,
    pub rejected_fixes: u64,
    /// Most recent non-fatal sensor error, if any
    pub last_sensor_error: Option<String>,
}

impl LiveSnapshot {
    pub fn idle() -> Self {
        Self {
            timestamp: current_timestamp(),
            status: SessionStatus::Idle,
            current_fix: None,
            elapsed_active_secs: 0,
            distance_km: 0.0,
            average_pace_min_per_km: 0.0,
            calories: 0.0,
            route: Vec::new(),
            accepted_fixes: 0,
            rejected_fixes: 0,
            last_sensor_error: None,
        }
    }

    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
