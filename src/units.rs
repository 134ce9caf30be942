//! Display formatting shared with downstream UIs. The exact shapes are part
//! of the boundary contract.

/// Format elapsed seconds as "H:MM:SS", or "M:SS" under an hour.
pub fn format_elapsed(seconds: u64) -> String {
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

/// Format a pace in minutes per kilometer as "M:SS".
///
/// Zero, negative and non-finite paces all render as "0:00".
pub fn format_pace(min_per_km: f64) -> String {
    if !min_per_km.is_finite() || min_per_km <= 0.0 {
        return "0:00".to_string();
    }
    let mut minutes = min_per_km.trunc() as u64;
    let mut seconds = (min_per_km.fract() * 60.0).round() as u64;
    if seconds == 60 {
        minutes += 1;
        seconds = 0;
    }
    format!("{}:{:02}", minutes, seconds)
}
