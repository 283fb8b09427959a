//! Fixed-point UTC time base.
//!
//! Timestamps are `i64` ticks where one second is 2³⁰ ticks, counted from
//! 2018-01-01T00:00:00Z. The power-of-two fraction keeps conversions exact
//! for binary sample rates and gives ~34 years of range on either side of
//! the epoch with sub-nanosecond resolution.

use std::time::{SystemTime, UNIX_EPOCH};

/// One second in timestamp ticks (2³⁰).
pub const SECOND: i64 = 1 << 30;

/// One millisecond in timestamp ticks, rounded.
pub const MILLISECOND: i64 = (SECOND + 500) / 1000;

/// One microsecond in timestamp ticks, rounded.
pub const MICROSECOND: i64 = (SECOND + 500_000) / 1_000_000;

/// One minute in timestamp ticks.
pub const MINUTE: i64 = 60 * SECOND;

/// One hour in timestamp ticks.
pub const HOUR: i64 = 60 * MINUTE;

/// One day in timestamp ticks.
pub const DAY: i64 = 24 * HOUR;

/// One (non-leap) year in timestamp ticks.
pub const YEAR: i64 = 365 * DAY;

/// The time base epoch as seconds since the Unix epoch (2018-01-01T00:00:00Z).
pub const EPOCH_UNIX_SECONDS: i64 = 1_514_764_800;

/// Returns the current UTC time in timestamp ticks.
///
/// Times before the epoch (a clock set before 2018) saturate to 0.
pub fn now() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => {
            let secs = d.as_secs() as i64 - EPOCH_UNIX_SECONDS;
            if secs < 0 {
                return 0;
            }
            let frac = (u64::from(d.subsec_nanos()) * (SECOND as u64) / 1_000_000_000) as i64;
            secs * SECOND + frac
        }
        Err(_) => 0,
    }
}

/// Divides with rounding, branching on sign so that truncating integer
/// division cannot bias negative quotients by one.
fn div_round(num: i128, den: i128) -> i64 {
    let rounded = if (num >= 0) == (den > 0) {
        (2 * num + den) / (2 * den)
    } else {
        (2 * num - den) / (2 * den)
    };
    rounded as i64
}

/// Converts a sample counter at `sample_rate` Hz to timestamp ticks, rounded.
pub fn counter_to_time(counter: i64, sample_rate: u32) -> i64 {
    debug_assert!(sample_rate > 0);
    div_round((counter as i128) * (SECOND as i128), sample_rate as i128)
}

/// Converts timestamp ticks to a sample counter at `sample_rate` Hz, rounded.
pub fn time_to_counter(time: i64, sample_rate: u32) -> i64 {
    debug_assert!(sample_rate > 0);
    div_round((time as i128) * (sample_rate as i128), SECOND as i128)
}
