//! Epoch-time helpers shared by the dispatcher and the stores.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn duration_since_epoch() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("incorrect system time")
}

pub fn seconds_since_epoch() -> u64 {
    duration_since_epoch().as_secs()
}

/// Nanoseconds since the Unix epoch. Used as the monotone cursor key for
/// blob metadata.
pub fn nanos_since_epoch() -> u64 {
    duration_since_epoch().as_nanos() as u64
}
