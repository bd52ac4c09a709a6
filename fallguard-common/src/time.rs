//! Timestamp utilities

use chrono::{DateTime, TimeZone, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Current wall-clock time as fractional seconds since the Unix epoch
pub fn unix_seconds() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Convert fractional Unix seconds to a UTC timestamp
///
/// Out-of-range values clamp to the epoch.
pub fn from_unix_seconds(seconds: f64) -> DateTime<Utc> {
    let micros = (seconds * 1_000_000.0).round() as i64;
    Utc.timestamp_micros(micros).single().unwrap_or_default()
}
