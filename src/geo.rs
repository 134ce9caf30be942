use serde::{Deserialize, Serialize};

/// Mean Earth radius in kilometers (spherical approximation).
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Single GPS observation from the location sensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoFix {
    pub latitude: f64,
    pub longitude: f64,
    /// Capture time in seconds since the Unix epoch
    pub captured_at: f64,
    /// Reported horizontal accuracy in meters, when the sensor provides one
    pub accuracy: Option<f64>,
}

impl GeoFix {
    pub fn new(latitude: f64, longitude: f64, captured_at: f64) -> Self {
        Self {
            latitude,
            longitude,
            captured_at,
            accuracy: None,
        }
    }

    pub fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }
}

/// Great-circle distance between two fixes in kilometers (haversine).
pub fn haversine_km(a: &GeoFix, b: &GeoFix) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos()
            * b.latitude.to_radians().cos()
            * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).max(0.0).sqrt());
    EARTH_RADIUS_KM * c
}
