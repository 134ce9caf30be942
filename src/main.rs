use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

use activity_tracker_rs::{
    format_elapsed, format_pace, GeoFix, JsonFileSink, LocationSource, SessionSink,
    SessionTracker, SimulatedSource, TrackerConfig,
};

#[derive(Parser, Debug)]
#[command(name = "activity_tracker")]
#[command(about = "Location tracking core demo - simulated walk session", long_about = None)]
struct Args {
    /// Session duration in seconds
    #[arg(value_name = "SECONDS", default_value = "30")]
    duration: u64,

    /// Body weight in kilograms for the calorie estimate
    #[arg(long, default_value = "70.0")]
    weight_kg: f64,

    /// Seconds spent paused in the middle of the session
    #[arg(long, default_value = "0")]
    pause_secs: u64,

    /// Output directory for the session JSON and GPX
    #[arg(long, default_value = "tracker_sessions")]
    output_dir: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    println!("[{}] Activity Tracker Starting", ts_now());
    println!("  Duration: {} seconds", args.duration);
    println!("  Body Weight: {} kg", args.weight_kg);
    println!("  Output Dir: {}", args.output_dir);

    std::fs::create_dir_all(&args.output_dir)?;

    let config = TrackerConfig::default().with_body_weight(args.weight_kg);
    // Scripted walk: one fix per second, ~55 m apart along the equator
    let source: Arc<dyn LocationSource> = Arc::new(simulated_walk(args.duration));
    let sink: Arc<dyn SessionSink> = Arc::new(JsonFileSink::new(&args.output_dir));

    let mut tracker = SessionTracker::new(config, source, sink);

    println!("[{}] Waiting for first fix...", ts_now());
    tracker.start().await?;
    println!("[{}] Tracking (session {})", ts_now(), tracker.session_id()?);

    let half = args.duration / 2;
    for _ in 0..half {
        sleep(Duration::from_secs(1)).await;
        print_status(&tracker);
    }

    if args.pause_secs > 0 {
        tracker.pause()?;
        println!("[{}] Paused for {} seconds", ts_now(), args.pause_secs);
        sleep(Duration::from_secs(args.pause_secs)).await;
        tracker.resume()?;
        println!("[{}] Resumed", ts_now());
    }

    for _ in half..args.duration {
        sleep(Duration::from_secs(1)).await;
        print_status(&tracker);
    }

    let record = tracker.stop().await?;
    println!(
        "[{}] Finalized: {:.1} m, {:.0} kcal, pace {}, {} steps (est), {} fixes",
        ts_now(),
        record.distance_meters,
        record.calories,
        format_pace(record.average_pace_min_per_km),
        record.estimated_steps,
        record.route.len()
    );

    let gpx_path = format!("{}/{}.gpx", args.output_dir, record.session_id);
    std::fs::write(&gpx_path, record.to_gpx_xml())?;
    println!("[{}] Saved JSON + GPX to {}", ts_now(), args.output_dir);

    Ok(())
}

fn simulated_walk(duration_secs: u64) -> SimulatedSource {
    let steps = duration_secs as usize + 2;
    let start = Utc::now().timestamp() as f64;
    let fixes = (0..steps)
        .map(|i| {
            let seq = i as f64;
            GeoFix::new(0.0, seq * 0.0005, start + seq).with_accuracy(5.0 + (seq * 0.1).sin() * 2.0)
        })
        .collect();
    SimulatedSource::new(fixes, Duration::from_secs(1))
}

fn print_status(tracker: &SessionTracker) {
    let snap = tracker.snapshot();
    println!(
        "[{}] {} | {:.3} km | pace {} | {:.1} kcal | {} fixes ({} rejected)",
        ts_now(),
        format_elapsed(snap.elapsed_active_secs),
        snap.distance_km,
        format_pace(snap.average_pace_min_per_km),
        snap.calories,
        snap.route.len(),
        snap.rejected_fixes
    );
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
