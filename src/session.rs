use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::config::TrackerConfig;
use crate::error::{TrackResult, TrackerError};
use crate::filter::GeoSampleFilter;
use crate::geo::GeoFix;
use crate::metrics::MetricsAccumulator;
use crate::route::Route;
use crate::snapshot::{current_timestamp, LiveSnapshot};
use crate::source::{LocationSource, SourceEvent};
use crate::storage::{FinalizedSession, SessionSink, STEPS_PER_METER};

/// Session state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    /// Created but not tracking
    Idle,
    /// Recording fixes and accumulating active time
    Tracking,
    /// Sensor closed, active time frozen, session still live
    Paused,
    /// Terminal; the session is immutable
    Finalized,
}

/// Mutable session state. All mutation happens while holding the one
/// mutex around this struct, so fix processing and tick processing never
/// interleave mid-event.
struct SessionInner {
    id: String,
    start_time: Option<String>,
    end_time: Option<String>,
    status: SessionStatus,
    route: Route,
    filter: GeoSampleFilter,
    metrics: MetricsAccumulator,
    current_fix: Option<GeoFix>,
    elapsed_active_secs: u64,
    last_sensor_error: Option<String>,
}

impl SessionInner {
    fn new(id: String, config: &TrackerConfig) -> Self {
        Self {
            id,
            start_time: None,
            end_time: None,
            status: SessionStatus::Idle,
            route: Route::new(),
            filter: GeoSampleFilter::new(config.max_jump_m, config.max_accuracy_m),
            metrics: MetricsAccumulator::new(config.met, config.body_weight_kg),
            current_fix: None,
            elapsed_active_secs: 0,
            last_sensor_error: None,
        }
    }

    /// Filter -> route append -> accumulator update, atomic per event.
    fn apply_fix(&mut self, fix: GeoFix) {
        if self.status != SessionStatus::Tracking {
            return;
        }
        if let Some(delta_km) = self.filter.evaluate(&fix) {
            self.route.append(fix.clone());
            self.metrics.add_distance_km(delta_km);
            self.metrics.recompute(self.elapsed_active_secs);
            self.current_fix = Some(fix);
        }
    }

    /// One logical second of active time. Ticks keep firing while Paused
    /// but must not advance active time.
    fn apply_tick(&mut self) {
        if self.status != SessionStatus::Tracking {
            return;
        }
        self.elapsed_active_secs += 1;
        self.metrics.recompute(self.elapsed_active_secs);
    }

    fn live_snapshot(&self) -> LiveSnapshot {
        LiveSnapshot {
            timestamp: current_timestamp(),
            status: self.status,
            current_fix: self.current_fix.clone(),
            elapsed_active_secs: self.elapsed_active_secs,
            distance_km: self.metrics.distance_km,
            average_pace_min_per_km: self.metrics.average_pace_min_per_km,
            calories: self.metrics.calories,
            route: self.route.snapshot(),
            accepted_fixes: self.filter.accepted_count(),
            rejected_fixes: self.filter.rejected_count(),
            last_sensor_error: self.last_sensor_error.clone(),
        }
    }

    fn build_record(&self) -> FinalizedSession {
        let meters = self.metrics.distance_meters();
        FinalizedSession {
            session_id: self.id.clone(),
            start_time: self.start_time.clone().unwrap_or_default(),
            end_time: self.end_time.clone().unwrap_or_default(),
            elapsed_active_secs: self.elapsed_active_secs,
            distance_meters: meters,
            calories: self.metrics.calories,
            average_pace_min_per_km: self.metrics.average_pace_min_per_km,
            estimated_steps: (meters * STEPS_PER_METER).round() as u64,
            route: self.route.snapshot(),
        }
    }
}

/// One tracking instance: owns the sensor subscription, the tick
/// scheduler, and the session aggregate. Create a new tracker for each
/// session; a finalized tracker never tracks again.
pub struct SessionTracker {
    config: TrackerConfig,
    source: Arc<dyn LocationSource>,
    sink: Arc<dyn SessionSink>,
    inner: Arc<Mutex<SessionInner>>,
    snapshot_tx: Arc<watch::Sender<LiveSnapshot>>,
    snapshot_rx: watch::Receiver<LiveSnapshot>,
    subscription_id: Option<u64>,
    fix_task: Option<JoinHandle<()>>,
    tick_task: Option<JoinHandle<()>>,
    finalized: Option<FinalizedSession>,
}

impl SessionTracker {
    pub fn new(
        config: TrackerConfig,
        source: Arc<dyn LocationSource>,
        sink: Arc<dyn SessionSink>,
    ) -> Self {
        let id = format!("session_{}", Utc::now().timestamp_millis());
        let inner = SessionInner::new(id, &config);
        let (snapshot_tx, snapshot_rx) = watch::channel(LiveSnapshot::idle());
        Self {
            config,
            source,
            sink,
            inner: Arc::new(Mutex::new(inner)),
            snapshot_tx: Arc::new(snapshot_tx),
            snapshot_rx,
            subscription_id: None,
            fix_task: None,
            tick_task: None,
            finalized: None,
        }
    }

    pub fn session_id(&self) -> TrackResult<String> {
        Ok(self.lock_inner()?.id.clone())
    }

    pub fn status(&self) -> TrackResult<SessionStatus> {
        Ok(self.lock_inner()?.status)
    }

    /// Latest published live snapshot.
    pub fn snapshot(&self) -> LiveSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// Subscribe to live snapshot updates (one per accepted fix, tick, and
    /// transition).
    pub fn watch(&self) -> watch::Receiver<LiveSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// The finalized record, available once `stop` has run (even when the
    /// save failed and needs a retry).
    pub fn finalized(&self) -> Option<&FinalizedSession> {
        self.finalized.as_ref()
    }

    /// Idle -> Tracking. Blocks until the first fix arrives or the
    /// configured wait elapses; seeds the route with that fix, then opens
    /// the continuous subscription and starts the tick scheduler.
    pub async fn start(&mut self) -> TrackResult<()> {
        {
            let inner = self.lock_inner()?;
            if inner.status != SessionStatus::Idle {
                return Err(TrackerError::InvalidStateTransition {
                    from: inner.status,
                    action: "start",
                });
            }
        }

        let first = self
            .source
            .current_fix(self.config.first_fix_timeout)
            .await?;

        {
            let mut inner = self.lock_inner()?;
            inner.start_time = Some(Utc::now().to_rfc3339());
            if let Some(delta_km) = inner.filter.evaluate(&first) {
                inner.route.append(first.clone());
                inner.metrics.add_distance_km(delta_km);
            }
            inner.current_fix = Some(first);
            inner.status = SessionStatus::Tracking;
        }

        if let Err(err) = self.open_subscription() {
            // Failed start attempt: tear down defensively and return to a
            // clean Idle session so the caller can retry start().
            self.close_sensor();
            self.stop_ticker();
            if let Ok(mut inner) = self.inner.lock() {
                *inner = SessionInner::new(inner.id.clone(), &self.config);
            }
            return Err(err);
        }
        self.start_ticker();
        self.publish();
        Ok(())
    }

    /// Tracking -> Paused. Closes the sensor subscription; ticks keep
    /// firing but stop advancing active time.
    pub fn pause(&mut self) -> TrackResult<()> {
        {
            let mut inner = self.lock_inner()?;
            if inner.status != SessionStatus::Tracking {
                return Err(TrackerError::InvalidStateTransition {
                    from: inner.status,
                    action: "pause",
                });
            }
            inner.status = SessionStatus::Paused;
        }
        self.close_sensor();
        self.publish();
        Ok(())
    }

    /// Paused -> Tracking. Opens a fresh subscription; the filter keeps
    /// the pre-pause fix as its comparison baseline.
    pub fn resume(&mut self) -> TrackResult<()> {
        {
            let inner = self.lock_inner()?;
            if inner.status != SessionStatus::Paused {
                return Err(TrackerError::InvalidStateTransition {
                    from: inner.status,
                    action: "resume",
                });
            }
        }
        self.open_subscription()?;
        {
            let mut inner = self.lock_inner()?;
            inner.status = SessionStatus::Tracking;
        }
        self.publish();
        Ok(())
    }

    /// Tracking|Paused -> Finalized. Teardown happens unconditionally
    /// before the final save; a failed save leaves the session Finalized
    /// with the record available through `finalized` / `retry_save`.
    pub async fn stop(&mut self) -> TrackResult<FinalizedSession> {
        let record = {
            let mut inner = self.lock_inner()?;
            if !matches!(
                inner.status,
                SessionStatus::Tracking | SessionStatus::Paused
            ) {
                return Err(TrackerError::InvalidStateTransition {
                    from: inner.status,
                    action: "stop",
                });
            }
            inner.status = SessionStatus::Finalized;
            inner.end_time = Some(Utc::now().to_rfc3339());
            let elapsed = inner.elapsed_active_secs;
            inner.metrics.recompute(elapsed);
            inner.build_record()
        };

        self.close_sensor();
        self.stop_ticker();
        self.finalized = Some(record.clone());
        self.publish();

        self.sink.save_session(&record).await?;
        Ok(record)
    }

    /// Retry the persistence step after a failed `stop` save.
    pub async fn retry_save(&self) -> TrackResult<()> {
        let record = self.finalized.clone().ok_or_else(|| {
            let from = self.status().unwrap_or(SessionStatus::Idle);
            TrackerError::InvalidStateTransition {
                from,
                action: "retry_save",
            }
        })?;
        self.sink.save_session(&record).await
    }

    fn open_subscription(&mut self) -> TrackResult<()> {
        let subscription = self.source.subscribe()?;
        self.subscription_id = Some(subscription.id);

        let inner = Arc::clone(&self.inner);
        let snapshot_tx = Arc::clone(&self.snapshot_tx);
        let mut events = subscription.events;

        self.fix_task = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Ok(mut inner) = inner.lock() else { return };
                match event {
                    SourceEvent::Fix(fix) => inner.apply_fix(fix),
                    SourceEvent::Error(message) => {
                        // Non-fatal: the session stays live, the caller
                        // sees the error on the snapshot and decides.
                        log::warn!("sensor error mid-session: {message}");
                        inner.last_sensor_error = Some(message);
                    }
                }
                let snap = inner.live_snapshot();
                drop(inner);
                snapshot_tx.send_replace(snap);
            }
        }));
        Ok(())
    }

    fn start_ticker(&mut self) {
        if self.tick_task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let snapshot_tx = Arc::clone(&self.snapshot_tx);
        let period = self.config.tick_interval;

        self.tick_task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // interval yields immediately on the first tick
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Ok(mut inner) = inner.lock() else { return };
                inner.apply_tick();
                let snap = inner.live_snapshot();
                drop(inner);
                snapshot_tx.send_replace(snap);
            }
        }));
    }

    /// Release the sensor subscription. Safe to call at any time, in any
    /// state, any number of times.
    fn close_sensor(&mut self) {
        if let Some(id) = self.subscription_id.take() {
            self.source.unsubscribe(id);
        }
        if let Some(task) = self.fix_task.take() {
            task.abort();
        }
    }

    /// Stop the tick scheduler. Idempotent like `close_sensor`.
    fn stop_ticker(&mut self) {
        if let Some(task) = self.tick_task.take() {
            task.abort();
        }
    }

    fn publish(&self) {
        if let Ok(inner) = self.inner.lock() {
            self.snapshot_tx.send_replace(inner.live_snapshot());
        }
    }

    fn lock_inner(&self) -> TrackResult<std::sync::MutexGuard<'_, SessionInner>> {
        self.inner
            .lock()
            .map_err(|_| TrackerError::Internal("session state lock poisoned".to_string()))
    }
}

impl Drop for SessionTracker {
    fn drop(&mut self) {
        self.close_sensor();
        self.stop_ticker();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{ManualSource, SimulatedSource};
    use approx::assert_relative_eq;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::time::sleep;

    struct MemorySink {
        saved: Mutex<Vec<FinalizedSession>>,
        fail: AtomicBool,
    }

    impl MemorySink {
        fn new() -> Self {
            Self {
                saved: Mutex::new(Vec::new()),
                fail: AtomicBool::new(false),
            }
        }

        fn failing() -> Self {
            let sink = Self::new();
            sink.fail.store(true, Ordering::SeqCst);
            sink
        }

        fn set_fail(&self, fail: bool) {
            self.fail.store(fail, Ordering::SeqCst);
        }

        fn saved_count(&self) -> usize {
            self.saved.lock().unwrap().len()
        }
    }

    impl SessionSink for MemorySink {
        fn save_session(&self, record: &FinalizedSession) -> BoxFuture<'_, TrackResult<()>> {
            let record = record.clone();
            Box::pin(async move {
                if self.fail.load(Ordering::SeqCst) {
                    return Err(TrackerError::Persistence("disk full".to_string()));
                }
                self.saved.lock().unwrap().push(record);
                Ok(())
            })
        }
    }

    fn manual_tracker() -> (Arc<ManualSource>, Arc<MemorySink>, SessionTracker) {
        let _ = env_logger::builder().is_test(true).try_init();
        let source = Arc::new(ManualSource::new());
        let sink = Arc::new(MemorySink::new());
        let tracker = SessionTracker::new(
            TrackerConfig::default(),
            source.clone() as Arc<dyn LocationSource>,
            sink.clone() as Arc<dyn SessionSink>,
        );
        (source, sink, tracker)
    }

    /// Let spawned fix/tick tasks run under the paused test clock.
    async fn settle() {
        sleep(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_pause_and_resume_rejected_from_idle() {
        let (_source, _sink, mut tracker) = manual_tracker();
        assert!(matches!(
            tracker.pause().unwrap_err(),
            TrackerError::InvalidStateTransition { action: "pause", .. }
        ));
        assert!(matches!(
            tracker.resume().unwrap_err(),
            TrackerError::InvalidStateTransition { action: "resume", .. }
        ));
        assert_eq!(tracker.status().unwrap(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_rejected_while_tracking() {
        let (source, _sink, mut tracker) = manual_tracker();
        source.set_current_fix(GeoFix::new(0.0, 0.0, 0.0));
        tracker.start().await.unwrap();
        assert_eq!(tracker.status().unwrap(), SessionStatus::Tracking);

        assert!(matches!(
            tracker.start().await.unwrap_err(),
            TrackerError::InvalidStateTransition { action: "start", .. }
        ));
        assert_eq!(tracker.status().unwrap(), SessionStatus::Tracking);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_times_out_without_a_fix() {
        let (_source, _sink, mut tracker) = manual_tracker();
        // No current fix configured on the source
        let err = tracker.start().await.unwrap_err();
        assert!(matches!(err, TrackerError::SensorTimeout(_)));
        assert_eq!(tracker.status().unwrap(), SessionStatus::Idle);
    }

    #[tokio::test]
    async fn test_start_surfaces_platform_failures() {
        let sink = Arc::new(MemorySink::new());

        let mut tracker = SessionTracker::new(
            TrackerConfig::default(),
            Arc::new(SimulatedSource::unavailable()),
            sink.clone() as Arc<dyn SessionSink>,
        );
        assert!(matches!(
            tracker.start().await.unwrap_err(),
            TrackerError::SensorUnavailable
        ));
        assert_eq!(tracker.status().unwrap(), SessionStatus::Idle);

        let mut tracker = SessionTracker::new(
            TrackerConfig::default(),
            Arc::new(SimulatedSource::permission_denied()),
            sink as Arc<dyn SessionSink>,
        );
        assert!(matches!(
            tracker.start().await.unwrap_err(),
            TrackerError::PermissionDenied
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_seeded_once_tracking() {
        let (source, _sink, mut tracker) = manual_tracker();
        source.set_current_fix(GeoFix::new(48.85, 2.35, 0.0).with_accuracy(8.0));
        tracker.start().await.unwrap();

        let snap = tracker.snapshot();
        assert_eq!(snap.route.len(), 1);
        assert_eq!(snap.current_fix.unwrap().latitude, 48.85);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_excludes_paused_time() {
        let (source, _sink, mut tracker) = manual_tracker();
        source.set_current_fix(GeoFix::new(0.0, 0.0, 0.0));
        tracker.start().await.unwrap();

        // Ticks land on whole seconds; stay off the boundaries.
        sleep(Duration::from_millis(10_500)).await; // 10 active ticks
        tracker.pause().unwrap();
        sleep(Duration::from_secs(5)).await; // ticks fire, none counted
        tracker.resume().unwrap();
        sleep(Duration::from_secs(5)).await; // 5 more active ticks

        let record = tracker.stop().await.unwrap();
        assert_eq!(record.elapsed_active_secs, 15);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_preserves_filter_baseline() {
        let (source, _sink, mut tracker) = manual_tracker();
        source.set_current_fix(GeoFix::new(0.0, 0.0, 0.0));
        tracker.start().await.unwrap();

        tracker.pause().unwrap();
        assert_eq!(source.active_subscriptions(), 0);
        tracker.resume().unwrap();
        assert_eq!(source.active_subscriptions(), 1);

        // ~133 m from the pre-pause baseline: rejected. Had the baseline
        // been reset on resume this would count as a first fix and pass.
        source.push_fix(GeoFix::new(0.0, 0.0012, 3.0));
        settle().await;
        let snap = tracker.snapshot();
        assert_eq!(snap.route.len(), 1);
        assert_eq!(snap.rejected_fixes, 1);

        // ~55 m from the same baseline: accepted.
        source.push_fix(GeoFix::new(0.0, 0.0005, 4.0));
        settle().await;
        let snap = tracker.snapshot();
        assert_eq!(snap.route.len(), 2);
        assert_relative_eq!(snap.distance_km * 1000.0, 55.6, max_relative = 0.01);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distance_is_monotonic_under_noise() {
        let (source, _sink, mut tracker) = manual_tracker();
        source.set_current_fix(GeoFix::new(0.0, 0.0, 0.0));
        tracker.start().await.unwrap();

        let mut last_distance = 0.0;
        let fixes = [
            GeoFix::new(0.0, 0.0005, 1.0),
            GeoFix::new(0.0, 0.0020, 2.0),                      // jump, rejected
            GeoFix::new(0.0, 0.0005, 3.0),                      // stationary repeat
            GeoFix::new(0.0, 0.0008, 4.0).with_accuracy(35.0),  // noisy, rejected
            GeoFix::new(0.0, 0.0010, 5.0).with_accuracy(6.0),
        ];
        for fix in fixes {
            source.push_fix(fix);
            settle().await;
            let snap = tracker.snapshot();
            assert!(snap.distance_km >= last_distance);
            last_distance = snap.distance_km;
        }

        let snap = tracker.snapshot();
        assert_eq!(snap.route.len(), 4);
        assert_eq!(snap.rejected_fixes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_to_end_walk_scenario() {
        let source = Arc::new(SimulatedSource::walk(0.0, 0.0, 3, 0.0005));
        let sink = Arc::new(MemorySink::new());
        let mut tracker = SessionTracker::new(
            TrackerConfig::default(),
            source as Arc<dyn LocationSource>,
            sink.clone() as Arc<dyn SessionSink>,
        );

        tracker.start().await.unwrap();
        // Two remaining scripted fixes arrive one second apart
        sleep(Duration::from_millis(2_500)).await;
        let record = tracker.stop().await.unwrap();

        assert_eq!(record.route.len(), 3);
        assert_relative_eq!(record.distance_meters, 111.19, max_relative = 0.01);
        assert!((143..=146).contains(&record.estimated_steps));
        assert!(record.average_pace_min_per_km > 0.0);
        assert_eq!(tracker.status().unwrap(), SessionStatus::Finalized);
        assert_eq!(sink.saved_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_keeps_finalized_and_supports_retry() {
        let source = Arc::new(ManualSource::new());
        source.set_current_fix(GeoFix::new(0.0, 0.0, 0.0));
        let sink = Arc::new(MemorySink::failing());
        let mut tracker = SessionTracker::new(
            TrackerConfig::default(),
            source as Arc<dyn LocationSource>,
            sink.clone() as Arc<dyn SessionSink>,
        );

        tracker.start().await.unwrap();
        let err = tracker.stop().await.unwrap_err();
        assert!(matches!(err, TrackerError::Persistence(_)));

        // Tracking state is not rolled back by a failed save
        assert_eq!(tracker.status().unwrap(), SessionStatus::Finalized);
        assert!(tracker.finalized().is_some());
        assert_eq!(sink.saved_count(), 0);

        sink.set_fail(false);
        tracker.retry_save().await.unwrap();
        assert_eq!(sink.saved_count(), 1);

        // Finalized is terminal
        assert!(matches!(
            tracker.stop().await.unwrap_err(),
            TrackerError::InvalidStateTransition { action: "stop", .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_session_sensor_error_is_non_fatal() {
        let (source, _sink, mut tracker) = manual_tracker();
        source.set_current_fix(GeoFix::new(0.0, 0.0, 0.0));
        tracker.start().await.unwrap();

        source.push_error("permission revoked");
        settle().await;

        assert_eq!(tracker.status().unwrap(), SessionStatus::Tracking);
        assert_eq!(
            tracker.snapshot().last_sensor_error.as_deref(),
            Some("permission revoked")
        );
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let (_source, _sink, mut tracker) = manual_tracker();
        tracker.close_sensor();
        tracker.close_sensor();
        tracker.stop_ticker();
        tracker.stop_ticker();
        assert_eq!(tracker.status().unwrap(), SessionStatus::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_closes_subscription_and_drops_fixes() {
        let (source, _sink, mut tracker) = manual_tracker();
        source.set_current_fix(GeoFix::new(0.0, 0.0, 0.0));
        tracker.start().await.unwrap();
        assert_eq!(source.active_subscriptions(), 1);

        tracker.pause().unwrap();
        assert_eq!(source.active_subscriptions(), 0);

        // Nothing is listening; route stays frozen
        source.push_fix(GeoFix::new(0.0, 0.0005, 2.0));
        settle().await;
        assert_eq!(tracker.snapshot().route.len(), 1);
    }
}
