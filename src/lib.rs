//! Location tracking core for a fitness application: GPS fix filtering,
//! distance/pace/calorie accumulation, an Idle/Tracking/Paused/Finalized
//! session state machine, and an append-only route log. The sensor source
//! and persistence sink are collaborator traits supplied by the caller.

pub mod config;
pub mod error;
pub mod filter;
pub mod geo;
pub mod metrics;
pub mod route;
pub mod session;
pub mod snapshot;
pub mod source;
pub mod storage;
pub mod units;

pub use config::TrackerConfig;
pub use error::{TrackResult, TrackerError};
pub use filter::GeoSampleFilter;
pub use geo::GeoFix;
pub use route::Route;
pub use session::{SessionStatus, SessionTracker};
pub use snapshot::LiveSnapshot;
pub use source::{LocationSource, ManualSource, SimulatedSource, SourceEvent, Subscription};
pub use storage::{FinalizedSession, JsonFileSink, SessionSink};
pub use units::{format_elapsed, format_pace};
