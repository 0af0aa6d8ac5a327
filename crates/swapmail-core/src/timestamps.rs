//! Message timestamps: microseconds since the Unix epoch internally,
//! ISO-8601 on the wire.
//!
//! [`now_micros`] never moves backwards by more than the skew threshold:
//! when the wall clock jumps back (NTP step, VM resume) it keeps returning
//! the high-water mark, so freshly appended messages never sort before
//! messages written a moment earlier.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicI64, Ordering};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Backward jump threshold: 1 second in microseconds.
const BACKWARD_JUMP_THRESHOLD_US: i64 = 1_000_000;

/// Wire format for `createdAt`.
const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

static LAST_SYSTEM_TIME_US: AtomicI64 = AtomicI64::new(0);

/// Current time in microseconds, protected against backward clock jumps.
#[must_use]
pub fn now_micros() -> i64 {
    let current = Utc::now().timestamp_micros();
    let last = LAST_SYSTEM_TIME_US.load(Ordering::Relaxed);

    if last != 0 && current - last < -BACKWARD_JUMP_THRESHOLD_US {
        tracing::warn!(
            current_us = current,
            high_water_us = last,
            "wall clock jumped backwards; holding timestamp high-water mark"
        );
        return last;
    }

    LAST_SYSTEM_TIME_US.fetch_max(current, Ordering::Relaxed);
    current
}

/// Convert microseconds since epoch to a UTC datetime, saturating at
/// chrono's representable range.
#[must_use]
pub fn micros_to_datetime(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(MICROS_PER_SECOND);
    let sub_micros = micros.rem_euclid(MICROS_PER_SECOND);
    let nsecs = u32::try_from(sub_micros * 1000).unwrap_or(0);
    Utc.timestamp_opt(secs, nsecs).single().unwrap_or(if micros < 0 {
        DateTime::<Utc>::MIN_UTC
    } else {
        DateTime::<Utc>::MAX_UTC
    })
}

/// Render microseconds as the wire ISO-8601 string.
#[must_use]
pub fn micros_to_iso(micros: i64) -> String {
    micros_to_datetime(micros).format(ISO_FORMAT).to_string()
}

/// Parse an ISO-8601 timestamp (RFC 3339 with offset, or naive UTC).
#[must_use]
pub fn iso_to_micros(s: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_micros());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ") {
        return Some(dt.and_utc().timestamp_micros());
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_micros())
}

/// Serde adapter: `i64` microseconds <-> ISO-8601 string.
pub mod iso_micros {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(micros: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::micros_to_iso(*micros))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::iso_to_micros(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid ISO-8601 timestamp: {raw}")))
    }
}
