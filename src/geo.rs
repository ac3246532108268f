use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::GeoError;

/// Mean Earth radius in meters.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

pub const DEFAULT_MAX_DISTANCE_METERS: f64 = 100.0;

/// A WGS-84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lng")]
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Builds a coordinate from user input, rejecting anything outside the
    /// valid latitude/longitude ranges.
    pub fn checked(latitude: f64, longitude: f64) -> Result<Self, GeoError> {
        if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
            return Err(GeoError::LatitudeOutOfRange(latitude));
        }
        if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
            return Err(GeoError::LongitudeOutOfRange(longitude));
        }
        Ok(Self::new(latitude, longitude))
    }
}

impl FromStr for Coordinate {
    type Err = GeoError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (lat, lng) = value
            .split_once(',')
            .ok_or_else(|| GeoError::Malformed(value.to_string()))?;
        let latitude: f64 = lat
            .trim()
            .parse()
            .map_err(|_| GeoError::Malformed(value.to_string()))?;
        let longitude: f64 = lng
            .trim()
            .parse()
            .map_err(|_| GeoError::Malformed(value.to_string()))?;
        Self::checked(latitude, longitude)
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6},{:.6}", self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProximityResult {
    pub is_within_range: bool,
    /// Rounded distance; `None` when the inputs did not yield a finite one.
    pub distance_meters: Option<i64>,
    pub message: String,
}

/// Great-circle distance in meters using the Haversine formula.
///
/// Inputs are not validated: NaN or out-of-range degrees propagate into the
/// result.
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let phi1 = a.latitude.to_radians();
    let phi2 = b.latitude.to_radians();
    let delta_phi = (b.latitude - a.latitude).to_radians();
    let delta_lambda = (b.longitude - a.longitude).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_METERS * c
}

pub fn verify_proximity(
    subject: Coordinate,
    target: Coordinate,
    max_distance_meters: f64,
) -> ProximityResult {
    let distance = distance_meters(subject, target);
    if !distance.is_finite() {
        return ProximityResult {
            is_within_range: false,
            distance_meters: None,
            message: "Distance to the task location could not be computed.".to_string(),
        };
    }

    let is_within_range = distance <= max_distance_meters;
    let rounded = distance.round() as i64;

    let message = if is_within_range {
        format!("You are {rounded}m from the task location ✓")
    } else {
        format!(
            "You are {rounded}m away. Please get within {}m to check in.",
            format_threshold(max_distance_meters)
        )
    };

    ProximityResult {
        is_within_range,
        distance_meters: Some(rounded),
        message,
    }
}

pub fn format_distance(meters: f64) -> String {
    if meters < 1000.0 {
        format!("{}m", meters.round() as i64)
    } else {
        format!("{:.1}km", meters / 1000.0)
    }
}

fn format_threshold(meters: f64) -> String {
    if meters.fract() == 0.0 {
        format!("{}", meters as i64)
    } else {
        format!("{meters}")
    }
}
