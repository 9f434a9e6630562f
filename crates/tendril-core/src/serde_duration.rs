//! Serde helper for human-readable durations in configuration.
//!
//! Accepts strings such as `"250ms"`, `"3s"`, `"5m"`, `"2h"`, `"1d"`, or a bare
//! integer number of seconds (which is how figment surfaces numeric env vars).
//!
//! ```ignore
//! #[serde(deserialize_with = "tendril_core::serde_duration::deserialize")]
//! pub timeout: Duration,
//! ```

use std::fmt;
use std::time::Duration;

use serde::de::{self, Visitor};
use serde::Deserializer;

pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(DurationVisitor)
}

/// Parse a duration string with an `ms`, `s`, `m`, `h` or `d` suffix.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let invalid = || format!("invalid duration: {s}");

    let (number, unit_secs, is_millis) = if let Some(n) = s.strip_suffix("ms") {
        (n, 0, true)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1, false)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60, false)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3600, false)
    } else if let Some(n) = s.strip_suffix('d') {
        (n, 86_400, false)
    } else {
        (s, 1, false)
    };

    let value: u64 = number.trim().parse().map_err(|_| invalid())?;
    if is_millis {
        Ok(Duration::from_millis(value))
    } else {
        value
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(invalid)
    }
}

struct DurationVisitor;

impl<'de> Visitor<'de> for DurationVisitor {
    type Value = Duration;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a duration such as \"500ms\", \"30s\" or a number of seconds")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Duration, E> {
        Ok(Duration::from_secs(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Duration, E> {
        u64::try_from(v)
            .map(Duration::from_secs)
            .map_err(|_| E::custom("duration must not be negative"))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Duration, E> {
        parse_duration(v).map_err(E::custom)
    }
}
