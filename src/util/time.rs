//! Time utilities for the battle loop

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Convert epoch milliseconds into a wire timestamp
pub fn to_datetime(millis: u64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(millis as i64).unwrap_or_default()
}

/// Convert a wire timestamp back into epoch milliseconds (pre-epoch clamps to 0)
pub fn to_millis(at: &DateTime<Utc>) -> u64 {
    at.timestamp_millis().max(0) as u64
}

/// Loop cadence configuration
pub const CLOCK_TICK: Duration = Duration::from_secs(1); // countdown + battle timer
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const RESTORATION_POLL: Duration = Duration::from_millis(250);

/// A player whose heartbeat is older than this is considered disconnected
pub const DISCONNECT_TIMEOUT_MS: u64 = 10_000;

/// Host publishes a TimerSync this often (in active battle seconds)
pub const TIMER_SYNC_EVERY_SECS: u32 = 10;

/// Local wall clock collaborator
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// Clock backed by the system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        unix_millis()
    }
}

/// Manually advanced clock for deterministic runs
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self {
            now: AtomicU64::new(start_millis),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn set(&self, millis: u64) {
        self.now.store(millis, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datetime_round_trips_millis() {
        let at = to_datetime(1_700_000_123_456);
        assert_eq!(to_millis(&at), 1_700_000_123_456);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(2));
        assert_eq!(clock.now_millis(), 3_000);
        clock.set(42);
        assert_eq!(clock.now_millis(), 42);
    }
}
