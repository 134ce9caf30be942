use crate::geo::{haversine_km, GeoFix};

/// Validates raw fixes before they enter the route.
///
/// Consumer GPS drifts under multipath; accumulating every raw fix
/// overstates distance. A candidate is accepted when there is no previous
/// accepted fix, or when the incremental distance stays under the jump
/// threshold and the reported accuracy (if any) stays under the accuracy
/// threshold. Rejected fixes are dropped silently; the next candidate is
/// still compared against the last *accepted* fix.
#[derive(Debug, Clone)]
pub struct GeoSampleFilter {
    max_jump_m: f64,
    max_accuracy_m: f64,
    last_accepted: Option<GeoFix>,
    accepted: u64,
    rejected: u64,
}

impl GeoSampleFilter {
    pub fn new(max_jump_m: f64, max_accuracy_m: f64) -> Self {
        Self {
            max_jump_m,
            max_accuracy_m,
            last_accepted: None,
            accepted: 0,
            rejected: 0,
        }
    }

    /// Evaluate a candidate fix. Returns the incremental distance in
    /// kilometers when accepted (0.0 for the first fix or a stationary
    /// repeat), or `None` when rejected.
    pub fn evaluate(&mut self, candidate: &GeoFix) -> Option<f64> {
        let prev = match &self.last_accepted {
            None => {
                // First fix of the session is always accepted
                self.last_accepted = Some(candidate.clone());
                self.accepted += 1;
                return Some(0.0);
            }
            Some(prev) => prev,
        };

        let delta_km = haversine_km(prev, candidate);
        let jump_ok = delta_km * 1000.0 < self.max_jump_m;
        let accuracy_ok = candidate
            .accuracy
            .map(|acc| acc < self.max_accuracy_m)
            .unwrap_or(true);

        if jump_ok && accuracy_ok {
            self.last_accepted = Some(candidate.clone());
            self.accepted += 1;
            Some(delta_km)
        } else {
            self.rejected += 1;
            log::debug!(
                "rejected fix ({:.6}, {:.6}): delta {:.1}m accuracy {:?}",
                candidate.latitude,
                candidate.longitude,
                delta_km * 1000.0,
                candidate.accuracy
            );
            None
        }
    }

    /// Last accepted fix, preserved across pause/resume.
    pub fn last_accepted(&self) -> Option<&GeoFix> {
        self.last_accepted.as_ref()
    }

    pub fn accepted_count(&self) -> u64 {
        self.accepted
    }

    pub fn rejected_count(&self) -> u64 {
        self.rejected
    }
}
