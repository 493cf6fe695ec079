//! Injectable wall-clock seam.
//!
//! The election and reconciliation layers never read system time
//! directly; they take a [`Clock`] so every timeout can be driven by a
//! simulated clock in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Monotonic-enough millisecond clock.
pub trait Clock: Send + Sync {
    /// Current time in milliseconds since the Unix epoch (or a
    /// simulated origin).
    fn now_ms(&self) -> u64;

    /// Whether this clock is simulated (test/simulation) rather than
    /// backed by the operating system.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Production clock delegating to the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }
}

/// Simulated clock advanced explicitly by the test harness.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_ms: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the clock at a given millisecond timestamp.
    pub fn starting_at(ms: u64) -> Self {
        Self {
            now_ms: Arc::new(AtomicU64::new(ms)),
        }
    }

    /// Move time forward.
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    /// Jump to an absolute timestamp. Never moves backwards.
    pub fn set(&self, ms: u64) {
        self.now_ms.fetch_max(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ms(), 1_500);
        assert!(clock.is_simulated());
    }

    #[test]
    fn manual_clock_never_rewinds() {
        let clock = ManualClock::starting_at(2_000);
        clock.set(1_000);
        assert_eq!(clock.now_ms(), 2_000);
    }

    #[test]
    fn system_clock_progresses() {
        let clock = SystemClock::new();
        let a = clock.now_ms();
        let b = clock.now_ms();
        assert!(b >= a);
        assert!(!clock.is_simulated());
    }
}
