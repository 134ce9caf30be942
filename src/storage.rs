use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::error::{TrackResult, TrackerError};
use crate::geo::GeoFix;

/// Rough steps-per-meter heuristic for the derived step estimate. Not a
/// measured value; kept for parity with downstream diary displays.
pub const STEPS_PER_METER: f64 = 1.3;

/// Immutable record handed to the persistence collaborator on stop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalizedSession {
    pub session_id: String,
    pub start_time: String,
    pub end_time: String,
    pub elapsed_active_secs: u64,
    pub distance_meters: f64,
    pub calories: f64,
    pub average_pace_min_per_km: f64,
    /// Derived as distance_meters x 1.3, a heuristic rather than a count
    pub estimated_steps: u64,
    pub route: Vec<GeoFix>,
}

impl FinalizedSession {
    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Render the route as a GPX track for mapping applications.
    pub fn to_gpx_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str("<gpx version=\"1.1\" creator=\"ActivityTracker\">\n");
        xml.push_str("  <metadata>\n");
        xml.push_str(&format!("    <name>Session {}</name>\n", self.session_id));
        xml.push_str(&format!("    <desc>Recorded from {}</desc>\n", self.start_time));
        xml.push_str("  </metadata>\n");
        xml.push_str("  <trk>\n");
        xml.push_str(&format!("    <name>Session {}</name>\n", self.session_id));
        xml.push_str("    <trkseg>\n");

        for fix in &self.route {
            let time = chrono::DateTime::<chrono::Utc>::from(
                std::time::UNIX_EPOCH
                    + std::time::Duration::from_secs_f64(fix.captured_at.max(0.0)),
            )
            .to_rfc3339();
            xml.push_str(&format!(
                "      <trkpt lat=\"{}\" lon=\"{}\">\n",
                fix.latitude, fix.longitude
            ));
            xml.push_str(&format!("        <time>{}</time>\n", time));
            if let Some(accuracy) = fix.accuracy {
                // Approximate HDOP from reported accuracy
                xml.push_str(&format!("        <hdop>{}</hdop>\n", accuracy / 2.0));
            }
            xml.push_str("      </trkpt>\n");
        }

        xml.push_str("    </trkseg>\n");
        xml.push_str("  </trk>\n");
        xml.push_str("</gpx>\n");

        xml
    }
}

/// Persistence collaborator for finalized sessions.
pub trait SessionSink: Send + Sync {
    fn save_session(&self, record: &FinalizedSession) -> BoxFuture<'_, TrackResult<()>>;
}

/// Writes one pretty-printed JSON file per session into a directory.
pub struct JsonFileSink {
    dir: PathBuf,
}

impl JsonFileSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }
}

impl SessionSink for JsonFileSink {
    fn save_session(&self, record: &FinalizedSession) -> BoxFuture<'_, TrackResult<()>> {
        let path = self.session_path(&record.session_id);
        let record = record.clone();
        Box::pin(async move {
            let json = record
                .to_json()
                .map_err(|e| TrackerError::Persistence(e.to_string()))?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| TrackerError::Persistence(e.to_string()))?;
            }
            fs::write(&path, json).map_err(|e| TrackerError::Persistence(e.to_string()))?;
            Ok(())
        })
    }
}
