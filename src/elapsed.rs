use chrono::{DateTime, NaiveDateTime, Utc};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSpent {
    pub hours: i64,
    pub minutes: i64,
    pub formatted: String,
}

impl TimeSpent {
    pub fn from_minutes(total_minutes: i64) -> Self {
        let total_minutes = total_minutes.max(0);
        let hours = total_minutes / 60;
        let minutes = total_minutes % 60;
        let formatted = if hours > 0 {
            format!("{hours}h {minutes}m")
        } else {
            format!("{minutes}m")
        };

        Self {
            hours,
            minutes,
            formatted,
        }
    }

    pub fn total_minutes(&self) -> i64 {
        self.hours * 60 + self.minutes
    }
}

/// Whole minutes between `start` and `end` (now when absent).
///
/// An end before the start yields zero rather than a negative duration.
pub fn time_spent(start: DateTime<Utc>, end: Option<DateTime<Utc>>) -> TimeSpent {
    let end = end.unwrap_or_else(Utc::now);
    let elapsed = (end - start).num_minutes();

    if elapsed < 0 {
        tracing::warn!(%start, %end, "end precedes start, clamping elapsed time to zero");
    }

    TimeSpent::from_minutes(elapsed)
}

/// Accepts RFC 3339 timestamps; offset-less values are read as UTC.
pub fn parse_timestamp(value: &str) -> anyhow::Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(|e| anyhow::anyhow!("invalid timestamp {value:?}: {e}"))?;
    Ok(naive.and_utc())
}
