use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::geo::DEFAULT_MAX_DISTANCE_METERS;
use crate::location::DEFAULT_LOCATION_TIMEOUT;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub max_distance_meters: f64,
    pub location_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Config {
    /// Reads configuration from the process environment. `.env` is loaded by
    /// `main` before logging starts.
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_distance_meters = check_max_distance(
            "CHECKIN_MAX_DISTANCE_METERS",
            parse_or("CHECKIN_MAX_DISTANCE_METERS", DEFAULT_MAX_DISTANCE_METERS)?,
        )?;

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            max_distance_meters,
            location_timeout: Duration::from_secs(parse_or(
                "LOCATION_TIMEOUT_SECS",
                DEFAULT_LOCATION_TIMEOUT.as_secs(),
            )?),
        })
    }

    pub fn database(&self) -> Result<DatabaseConfig, ConfigError> {
        let url = self
            .database_url
            .clone()
            .ok_or(ConfigError::Missing("DATABASE_URL"))?;
        Ok(DatabaseConfig {
            url,
            max_connections: self.database_max_connections,
        })
    }
}

/// Parser for the `--max-distance` flag, held to the same rules as
/// `CHECKIN_MAX_DISTANCE_METERS`.
pub fn parse_max_distance(value: &str) -> Result<f64, ConfigError> {
    let meters = parse_value("--max-distance", Some(value.to_string()), DEFAULT_MAX_DISTANCE_METERS)?;
    check_max_distance("--max-distance", meters)
}

fn check_max_distance(key: &'static str, meters: f64) -> Result<f64, ConfigError> {
    if !meters.is_finite() || meters < 0.0 {
        return Err(ConfigError::Invalid {
            key,
            value: meters.to_string(),
            reason: "must be a non-negative number of meters".to_string(),
        });
    }
    Ok(meters)
}

fn parse_or<T>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    parse_value(key, env::var(key).ok(), default)
}

fn parse_value<T>(key: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            value,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_fall_back_to_defaults() {
        let value: u32 = parse_or("WEAVE_TEST_UNSET_KEY", 7).unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn unparseable_values_are_rejected() {
        let err = parse_value::<f64>("CHECKIN_MAX_DISTANCE_METERS", Some("far".to_string()), 100.0)
            .unwrap_err();
        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "CHECKIN_MAX_DISTANCE_METERS");
                assert_eq!(value, "far");
            }
            other => panic!("unexpected error: {other:?}"),
        }

        assert!(parse_value::<u32>("DATABASE_MAX_CONNECTIONS", Some("-3".to_string()), 5).is_err());
        assert_eq!(
            parse_value::<u64>("LOCATION_TIMEOUT_SECS", Some(" 15 ".to_string()), 10).unwrap(),
            15
        );
    }

    #[test]
    fn threshold_must_be_finite_and_non_negative() {
        assert!(check_max_distance("CHECKIN_MAX_DISTANCE_METERS", -1.0).is_err());
        assert!(check_max_distance("CHECKIN_MAX_DISTANCE_METERS", f64::NAN).is_err());
        assert!(check_max_distance("CHECKIN_MAX_DISTANCE_METERS", f64::INFINITY).is_err());
        assert_eq!(check_max_distance("CHECKIN_MAX_DISTANCE_METERS", 0.0).unwrap(), 0.0);
    }

    #[test]
    fn max_distance_flag_uses_the_same_rules() {
        assert_eq!(parse_max_distance("250").unwrap(), 250.0);
        assert!(parse_max_distance("-5").is_err());
        assert!(parse_max_distance("NaN").is_err());
        assert!(parse_max_distance("inf").is_err());
        assert!(parse_max_distance("nearby").is_err());
    }

    #[test]
    fn database_requires_url() {
        let config = Config {
            database_url: None,
            database_max_connections: 5,
            max_distance_meters: 100.0,
            location_timeout: DEFAULT_LOCATION_TIMEOUT,
        };
        let err = config.database().unwrap_err();
        assert_eq!(err.to_string(), "DATABASE_URL must be set");
    }

    #[test]
    fn database_carries_pool_size() {
        let config = Config {
            database_url: Some("postgres://localhost/weave".to_string()),
            database_max_connections: 12,
            max_distance_meters: 100.0,
            location_timeout: DEFAULT_LOCATION_TIMEOUT,
        };
        let database = config.database().unwrap();
        assert_eq!(database.url, "postgres://localhost/weave");
        assert_eq!(database.max_connections, 12);
    }
}
