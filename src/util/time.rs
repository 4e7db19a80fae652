//! Time utilities for game simulation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

/// Server start time for uptime tracking
static SERVER_START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

/// Initialize server start time (call once at startup)
pub fn init_server_time() {
    SERVER_START.get_or_init(Instant::now);
}

/// Get server uptime in seconds
pub fn uptime_secs() -> u64 {
    SERVER_START
        .get()
        .map(|start| start.elapsed().as_secs())
        .unwrap_or(0)
}

/// Scheduler rates
pub const SIMULATION_TPS: u32 = 60; // 60 ticks per second
pub const BROADCAST_TPS: u32 = 30; // 30 state pushes per second
pub const PERSIST_INTERVAL_MILLIS: u64 = 1_000;

pub fn simulation_period() -> Duration {
    Duration::from_micros(1_000_000 / SIMULATION_TPS as u64)
}

pub fn broadcast_period() -> Duration {
    Duration::from_micros(1_000_000 / BROADCAST_TPS as u64)
}

pub fn persist_period() -> Duration {
    Duration::from_millis(PERSIST_INTERVAL_MILLIS)
}

/// Wall-clock source for reset deadlines.
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

/// Manually advanced clock, used to simulate elapsed time
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

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_millis(), 1_000);
        clock.advance(250);
        assert_eq!(clock.now_millis(), 1_250);
    }

    #[test]
    fn broadcast_runs_slower_than_simulation() {
        assert!(broadcast_period() > simulation_period());
        assert!(persist_period() > broadcast_period());
    }
}
