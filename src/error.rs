use thiserror::Error;
use uuid::Uuid;

use crate::geo::ProximityResult;
use crate::models::AssignmentStatus;

#[derive(Debug, Error, PartialEq)]
pub enum GeoError {
    #[error("expected \"lat,lng\", got {0:?}")]
    Malformed(String),

    #[error("latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),
}

/// Failure categories for a single location request.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location provider is not available.")]
    Unsupported,

    #[error("Location permission denied. Please enable location access.")]
    PermissionDenied,

    #[error("Location information unavailable.")]
    PositionUnavailable,

    #[error("Location request timed out.")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum CheckInError {
    #[error("Task location not set. Cannot verify {0}.")]
    MissingTaskLocation(&'static str),

    #[error("assignment {id} is {status}, cannot {action}")]
    InvalidStatus {
        id: Uuid,
        status: AssignmentStatus,
        action: &'static str,
    },

    #[error("{}", .0.message)]
    OutOfRange(ProximityResult),

    #[error("assignment {0} has no check-in time")]
    NotStarted(Uuid),

    #[error("failed to encode assignment notes: {0}")]
    Notes(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}
