// File: ./src/timezone.rs
// Conversion between backend UTC time strings and device-local instants.
//
// Backends (Exchange EWS, AdAstra) exchange times as "YYYY-MM-DDTHH:MM:SSZ" in UTC.
// The device displays everything in one fixed local offset, resolved once from
// configuration (or the host clock) when the cache is constructed.
use crate::error::{CacheError, CacheResult};
use chrono::{DateTime, FixedOffset, Local, NaiveDateTime, Offset, Utc};
use serde::{Deserialize, Serialize};

pub const BACKEND_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

const SECONDS_PER_MINUTE: i32 = 60;
const DST_SHIFT_MINUTES: i32 = 60;

/// Local-vs-UTC offset settings.
///
/// `utc_offset_minutes` is the standard (winter) offset, east of UTC positive.
/// `dst` adds one hour on top of it. When no offset is configured, the host's
/// current offset is used as-is and `dst` is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimezoneConfig {
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
    #[serde(default)]
    pub dst: bool,
}

impl TimezoneConfig {
    pub fn fixed(utc_offset_minutes: i32, dst: bool) -> Self {
        Self {
            utc_offset_minutes: Some(utc_offset_minutes),
            dst,
        }
    }

    pub fn utc() -> Self {
        Self::fixed(0, false)
    }

    /// Resolve to a concrete offset.
    pub fn resolve(&self) -> CacheResult<FixedOffset> {
        match self.utc_offset_minutes {
            Some(minutes) => {
                let total = minutes + if self.dst { DST_SHIFT_MINUTES } else { 0 };
                FixedOffset::east_opt(total * SECONDS_PER_MINUTE).ok_or_else(|| {
                    CacheError::InvalidTimestamp(format!("utc offset out of range: {total} minutes"))
                })
            }
            None => Ok(Local::now().offset().fix()),
        }
    }
}

/// Parse a backend UTC time string into an instant in the given local offset.
pub fn parse_backend_time(s: &str, offset: &FixedOffset) -> CacheResult<DateTime<FixedOffset>> {
    let naive = NaiveDateTime::parse_from_str(s.trim(), BACKEND_TIME_FORMAT)
        .map_err(|e| CacheError::InvalidTimestamp(format!("'{s}': {e}")))?;
    Ok(naive.and_utc().with_timezone(offset))
}

/// Format an instant as a backend UTC time string.
pub fn format_backend_time(dt: &DateTime<FixedOffset>) -> String {
    dt.with_timezone(&Utc).format(BACKEND_TIME_FORMAT).to_string()
}

/// Build a local instant from epoch seconds (as found in the persisted cache file).
pub fn from_epoch_seconds(secs: f64, offset: &FixedOffset) -> CacheResult<DateTime<FixedOffset>> {
    if !secs.is_finite() {
        return Err(CacheError::InvalidTimestamp(format!("{secs}")));
    }
    // Nanoseconds are always non-negative, so split on floor, not trunc.
    let mut whole = secs.floor() as i64;
    let mut nanos = ((secs - secs.floor()) * 1e9).round() as u32;
    if nanos >= 1_000_000_000 {
        whole += 1;
        nanos = 0;
    }
    DateTime::<Utc>::from_timestamp(whole, nanos)
        .map(|dt| dt.with_timezone(offset))
        .ok_or_else(|| CacheError::InvalidTimestamp(format!("{secs} is out of range")))
}
