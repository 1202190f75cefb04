//! Time sources for entry expiry
//!
//! Expiry is tracked in whole seconds. The cache only ever compares values
//! from the same clock, so the origin is arbitrary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Time source, abstracted to allow testing with deterministic time.
pub trait Clock: Send + Sync {
    /// Current time in seconds.
    fn now(&self) -> u64;
}

/// Monotonic clock counting seconds since it was created.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        self.origin.elapsed().as_secs()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(initial: u64) -> Self {
        Self {
            now: AtomicU64::new(initial),
        }
    }

    pub fn advance(&self, secs: u64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }

    pub fn set(&self, secs: u64) {
        self.now.store(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_starts_near_zero() {
        let clock = SystemClock::new();
        assert!(clock.now() < 5);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        clock.advance(900);
        assert_eq!(clock.now(), 1000);
        clock.set(5);
        assert_eq!(clock.now(), 5);
    }
}
