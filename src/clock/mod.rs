use std::time::{SystemTime, UNIX_EPOCH};

/// Source of the current wall-clock time as float Unix-epoch seconds.
///
/// Ingestors take a clock so latency computation can be pinned in tests.
pub type NowFn = fn() -> f64;

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now_unix_secs() -> f64 {
    unix_secs(SystemTime::now())
}

/// Converts a wall-clock time to seconds since the Unix epoch.
///
/// Times before the epoch map to negative values.
pub fn unix_secs(t: SystemTime) -> f64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_secs_f64(),
        Err(e) => -e.duration().as_secs_f64(),
    }
}
