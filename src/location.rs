use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::LocationError;
use crate::geo::Coordinate;

pub const DEFAULT_LOCATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocationFix {
    pub coordinate: Coordinate,
    pub accuracy_meters: Option<f64>,
}

/// Source of the device's current position. One call is one request.
pub trait LocationProvider {
    fn current_location(&self) -> impl Future<Output = Result<LocationFix, LocationError>> + Send;
}

/// Issues a single location request bounded by `timeout`. No retries.
pub async fn acquire_location<P: LocationProvider>(
    provider: &P,
    timeout: Duration,
) -> Result<LocationFix, LocationError> {
    match tokio::time::timeout(timeout, provider.current_location()).await {
        Ok(Ok(fix)) => {
            tracing::debug!(
                lat = fix.coordinate.latitude,
                lng = fix.coordinate.longitude,
                accuracy = ?fix.accuracy_meters,
                "location acquired"
            );
            Ok(fix)
        }
        Ok(Err(err)) => {
            tracing::warn!(error = %err, "location request failed");
            Err(err)
        }
        Err(_) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "location request timed out");
            Err(LocationError::Timeout)
        }
    }
}

/// A position supplied up front, e.g. from the command line.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    fix: Option<LocationFix>,
}

impl StaticProvider {
    pub fn new(coordinate: Coordinate, accuracy_meters: Option<f64>) -> Self {
        Self {
            fix: Some(LocationFix {
                coordinate,
                accuracy_meters,
            }),
        }
    }

    pub fn unavailable() -> Self {
        Self { fix: None }
    }
}

impl LocationProvider for StaticProvider {
    async fn current_location(&self) -> Result<LocationFix, LocationError> {
        self.fix.ok_or(LocationError::Unsupported)
    }
}

/// Reads the latest fix a GPS daemon wrote as `{"lat":..,"lng":..,"accuracy":..}`.
#[derive(Debug, Clone)]
pub struct FixFileProvider {
    path: PathBuf,
}

#[derive(Deserialize)]
struct FixFile {
    lat: f64,
    lng: f64,
    accuracy: Option<f64>,
}

impl FixFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl LocationProvider for FixFileProvider {
    async fn current_location(&self) -> Result<LocationFix, LocationError> {
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::PermissionDenied => LocationError::PermissionDenied,
                _ => LocationError::PositionUnavailable,
            })?;

        let fix: FixFile = serde_json::from_str(&raw).map_err(|e| {
            tracing::warn!(path = %self.path.display(), error = %e, "malformed fix file");
            LocationError::PositionUnavailable
        })?;

        let coordinate = Coordinate::checked(fix.lat, fix.lng)
            .map_err(|_| LocationError::PositionUnavailable)?;

        Ok(LocationFix {
            coordinate,
            accuracy_meters: fix.accuracy,
        })
    }
}
