use serde::{Deserialize, Serialize};

/// Distance below which average pace is reported as 0 instead of blowing up.
const DISTANCE_EPSILON_KM: f64 = 1e-6;

/// Running totals derived from the route and elapsed active time.
///
/// Distance is accumulated in kilometers; meters appear only at the
/// persistence boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsAccumulator {
    pub distance_km: f64,
    pub average_pace_min_per_km: f64,
    pub calories: f64,
    met: f64,
    body_weight_kg: f64,
}

impl MetricsAccumulator {
    pub fn new(met: f64, body_weight_kg: f64) -> Self {
        Self {
            distance_km: 0.0,
            average_pace_min_per_km: 0.0,
            calories: 0.0,
            met,
            body_weight_kg,
        }
    }

    /// Add an accepted increment. Cumulative distance never decreases.
    pub fn add_distance_km(&mut self, delta_km: f64) {
        self.distance_km += delta_km.max(0.0);
    }

    /// Recompute pace and calories from elapsed active time. Pure with
    /// respect to the route; called on every tick and accepted fix.
    pub fn recompute(&mut self, elapsed_active_secs: u64) {
        let minutes = elapsed_active_secs as f64 / 60.0;
        let pace = if self.distance_km < DISTANCE_EPSILON_KM {
            0.0
        } else {
            minutes / self.distance_km
        };
        self.average_pace_min_per_km = if pace.is_finite() { pace } else { 0.0 };

        let hours = elapsed_active_secs as f64 / 3600.0;
        self.calories = self.met * self.body_weight_kg * hours;
    }

    pub fn distance_meters(&self) -> f64 {
        self.distance_km * 1000.0
    }
}
