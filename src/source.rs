use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{TrackResult, TrackerError};
use crate::geo::GeoFix;

/// Event delivered on an open subscription.
#[derive(Debug, Clone)]
pub enum SourceEvent {
    Fix(GeoFix),
    /// Mid-session sensor failure (e.g. permission revoked while tracking).
    /// Non-fatal; the consumer decides whether to stop.
    Error(String),
}

/// Live stream of sensor events. Dropping the receiver closes the stream;
/// `unsubscribe` with the handle id releases source-side resources.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub events: mpsc::Receiver<SourceEvent>,
}

/// Location sensor collaborator.
pub trait LocationSource: Send + Sync {
    /// Open a continuous fix stream.
    fn subscribe(&self) -> TrackResult<Subscription>;

    /// Release a subscription. Unknown or already-released ids are a no-op.
    fn unsubscribe(&self, id: u64);

    /// Single fix with a bounded wait, used to seed a session.
    fn current_fix(&self, timeout: Duration) -> BoxFuture<'_, TrackResult<GeoFix>>;
}

/// Failure mode a simulated source can be pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceFault {
    Unavailable,
    PermissionDenied,
}

struct Script {
    fixes: Vec<GeoFix>,
    pos: usize,
}

/// Scripted source replaying a fixed path at a fixed cadence. Used by the
/// demo binary and by tests that need sensor-driven sessions.
pub struct SimulatedSource {
    script: Arc<Mutex<Script>>,
    interval: Duration,
    fault: Option<SourceFault>,
    next_id: AtomicU64,
    tasks: Mutex<HashMap<u64, JoinHandle<()>>>,
}

impl SimulatedSource {
    pub fn new(fixes: Vec<GeoFix>, interval: Duration) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script { fixes, pos: 0 })),
            interval,
            fault: None,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Straight-line walk of `steps` fixes, one `step_deg` of longitude
    /// apart, one second apart, with plausible consumer-GPS accuracy.
    pub fn walk(start_lat: f64, start_lon: f64, steps: usize, step_deg: f64) -> Self {
        let fixes = (0..steps)
            .map(|i| {
                let seq = i as f64;
                GeoFix::new(start_lat, start_lon + seq * step_deg, seq)
                    .with_accuracy(5.0 + (seq * 0.1).sin() * 2.0)
            })
            .collect();
        Self::new(fixes, Duration::from_secs(1))
    }

    /// Source on a platform without location capability.
    pub fn unavailable() -> Self {
        let mut src = Self::new(Vec::new(), Duration::from_secs(1));
        src.fault = Some(SourceFault::Unavailable);
        src
    }

    /// Source the caller is not authorized to read.
    pub fn permission_denied() -> Self {
        let mut src = Self::new(Vec::new(), Duration::from_secs(1));
        src.fault = Some(SourceFault::PermissionDenied);
        src
    }

    fn fault_error(&self) -> Option<TrackerError> {
        match self.fault {
            Some(SourceFault::Unavailable) => Some(TrackerError::SensorUnavailable),
            Some(SourceFault::PermissionDenied) => Some(TrackerError::PermissionDenied),
            None => None,
        }
    }

    fn next_scripted(&self) -> Option<GeoFix> {
        let mut script = self.script.lock().ok()?;
        if script.pos < script.fixes.len() {
            let fix = script.fixes[script.pos].clone();
            script.pos += 1;
            Some(fix)
        } else {
            None
        }
    }
}

impl LocationSource for SimulatedSource {
    fn subscribe(&self) -> TrackResult<Subscription> {
        if let Some(err) = self.fault_error() {
            return Err(err);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<SourceEvent>(64);
        let interval = self.interval;
        let script = Arc::clone(&self.script);

        // The script cursor is shared, so a later subscription (after a
        // pause) continues from wherever the previous one stopped.
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let next = {
                    let Ok(mut guard) = script.lock() else { break };
                    if guard.pos < guard.fixes.len() {
                        let fix = guard.fixes[guard.pos].clone();
                        guard.pos += 1;
                        Some(fix)
                    } else {
                        None
                    }
                };
                match next {
                    Some(fix) => {
                        if tx.send(SourceEvent::Fix(fix)).await.is_err() {
                            break;
                        }
                    }
                    None => break, // script exhausted, go quiet like a dead sensor
                }
            }
        });

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.insert(id, handle);
        }
        Ok(Subscription { id, events: rx })
    }

    fn unsubscribe(&self, id: u64) {
        if let Ok(mut tasks) = self.tasks.lock() {
            if let Some(handle) = tasks.remove(&id) {
                handle.abort();
            }
        }
    }

    fn current_fix(&self, timeout: Duration) -> BoxFuture<'_, TrackResult<GeoFix>> {
        if let Some(err) = self.fault_error() {
            return Box::pin(async move { Err(err) });
        }
        match self.next_scripted() {
            Some(fix) => Box::pin(async move { Ok(fix) }),
            None => Box::pin(async move {
                tokio::time::sleep(timeout).await;
                Err(TrackerError::SensorTimeout(timeout))
            }),
        }
    }
}

/// Source driven explicitly by the caller; each pushed fix fans out to all
/// open subscriptions. Useful for tests and for bridging platform callback
/// APIs into the tracker.
#[derive(Default)]
pub struct ManualSource {
    current: Mutex<Option<GeoFix>>,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<SourceEvent>>>,
    next_id: AtomicU64,
}

impl ManualSource {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(None),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Set the fix returned by the next `current_fix` call.
    pub fn set_current_fix(&self, fix: GeoFix) {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(fix);
        }
    }

    /// Deliver a fix to every open subscription.
    pub fn push_fix(&self, fix: GeoFix) {
        self.broadcast(SourceEvent::Fix(fix));
    }

    /// Deliver a mid-session sensor error to every open subscription.
    pub fn push_error(&self, message: &str) {
        self.broadcast(SourceEvent::Error(message.to_string()));
    }

    pub fn active_subscriptions(&self) -> usize {
        self.subscribers.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn broadcast(&self, event: SourceEvent) {
        if let Ok(subscribers) = self.subscribers.lock() {
            for tx in subscribers.values() {
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

impl LocationSource for ManualSource {
    fn subscribe(&self) -> TrackResult<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel::<SourceEvent>(64);
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| TrackerError::Internal("subscriber lock poisoned".to_string()))?;
        subscribers.insert(id, tx);
        Ok(Subscription { id, events: rx })
    }

    fn unsubscribe(&self, id: u64) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.remove(&id);
        }
    }

    fn current_fix(&self, timeout: Duration) -> BoxFuture<'_, TrackResult<GeoFix>> {
        let fix = self.current.lock().ok().and_then(|c| c.clone());
        match fix {
            Some(fix) => Box::pin(async move { Ok(fix) }),
            None => Box::pin(async move {
                tokio::time::sleep(timeout).await;
                Err(TrackerError::SensorTimeout(timeout))
            }),
        }
    }
}
