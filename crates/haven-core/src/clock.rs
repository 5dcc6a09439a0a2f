//! Time helpers: epoch-millisecond conversion and the local send window.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tracing::warn;

/// Zone used when neither the user's zone nor the configured fallback parses.
pub const DEFAULT_TIMEZONE: Tz = chrono_tz::America::Los_Angeles;

pub fn to_ms(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

/// Convert epoch ms back to a UTC instant. Out-of-range values clamp to the epoch.
pub fn from_ms(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

/// Resolve a user's IANA zone, falling back when absent or unknown.
pub fn resolve_timezone(user_tz: Option<&str>, fallback: &str) -> Tz {
    if let Some(name) = user_tz.map(str::trim).filter(|s| !s.is_empty()) {
        match name.parse::<Tz>() {
            Ok(tz) => return tz,
            Err(_) => warn!("clock: unknown timezone '{name}', using {fallback}"),
        }
    }
    fallback.parse::<Tz>().unwrap_or(DEFAULT_TIMEZONE)
}

/// Hour of day (0-23) in `tz` at `now`.
pub fn local_hour(now: DateTime<Utc>, tz: Tz) -> u32 {
    now.with_timezone(&tz).hour()
}

/// Whether `now` falls in `[start, end)` local hours.
///
/// With the 9/20 defaults, 09:00 through 19:59 is inside and 20:00 is not.
pub fn is_within_send_window(now: DateTime<Utc>, tz: Tz, start: u32, end: u32) -> bool {
    let hour = local_hour(now, tz);
    if start <= end {
        hour >= start && hour < end
    } else {
        // Window wraps midnight.
        hour >= start || hour < end
    }
}

/// Next instant at or after `now` when the send window opens in `tz`.
///
/// Returns `now` when already inside the window.
pub fn next_window_open(now: DateTime<Utc>, tz: Tz, start: u32, end: u32) -> DateTime<Utc> {
    if is_within_send_window(now, tz, start, end) {
        return now;
    }
    let local = now.with_timezone(&tz);
    let date = if local.hour() < start {
        local.date_naive()
    } else {
        local.date_naive().succ_opt().unwrap_or(local.date_naive())
    };
    local_instant(tz, date, start).unwrap_or(now + Duration::hours(1))
}

/// `date` at `hour:00` local, stepping past a DST gap if the hour is skipped.
fn local_instant(tz: Tz, date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    let naive = date.and_hms_opt(hour, 0, 0)?;
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
        .map(|t| t.with_timezone(&Utc))
}
