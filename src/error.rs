use thiserror::Error;

use crate::session::SessionStatus;

/// Tracking error types
#[derive(Error, Debug, Clone)]
pub enum TrackerError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("No location capability on this platform")]
    SensorUnavailable,

    #[error("No fix arrived within {0:?}")]
    SensorTimeout(std::time::Duration),

    #[error("Invalid session state: cannot {action} while {from:?}")]
    InvalidStateTransition {
        from: SessionStatus,
        action: &'static str,
    },

    #[error("Persistence failed: {0}")]
    Persistence(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for tracker operations
pub type TrackResult<T> = Result<T, TrackerError>;
