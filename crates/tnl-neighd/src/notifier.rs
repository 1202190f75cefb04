//! Change sequence for downstream consumers of cached bindings
//!
//! A waiter remembers the last value it saw and blocks until the counter
//! moves. The wake carries no information about which mutation happened;
//! consumers re-read whatever state they need afterwards.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-4: System Monitoring - Consumers observe binding changes

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Monotonic version counter with wake-on-change.
#[derive(Debug, Default)]
pub struct ChangeNotifier {
    seq: Mutex<u64>,
    changed: Condvar,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current version.
    pub fn current(&self) -> u64 {
        *self.seq.lock()
    }

    /// Advance the version and wake every waiter. Returns the new version.
    pub fn bump(&self) -> u64 {
        let mut seq = self.seq.lock();
        *seq += 1;
        let version = *seq;
        drop(seq);
        self.changed.notify_all();
        version
    }

    /// Block until the version differs from `last_seen`, then return it.
    pub fn wait_for_change(&self, last_seen: u64) -> u64 {
        let mut seq = self.seq.lock();
        while *seq == last_seen {
            self.changed.wait(&mut seq);
        }
        *seq
    }

    /// Like [`wait_for_change`](Self::wait_for_change) but gives up after
    /// `timeout`, returning `None`.
    pub fn wait_for_change_timeout(&self, last_seen: u64, timeout: Duration) -> Option<u64> {
        let deadline = Instant::now() + timeout;
        let mut seq = self.seq.lock();
        while *seq == last_seen {
            if self.changed.wait_until(&mut seq, deadline).timed_out() {
                return (*seq != last_seen).then_some(*seq);
            }
        }
        Some(*seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_bump_is_monotonic() {
        let notifier = ChangeNotifier::new();
        assert_eq!(notifier.current(), 0);
        assert_eq!(notifier.bump(), 1);
        assert_eq!(notifier.bump(), 2);
        assert_eq!(notifier.current(), 2);
    }

    #[test]
    fn test_wait_returns_immediately_when_stale() {
        let notifier = ChangeNotifier::new();
        notifier.bump();
        assert_eq!(notifier.wait_for_change(0), 1);
    }

    #[test]
    fn test_wait_wakes_on_bump() {
        let notifier = Arc::new(ChangeNotifier::new());
        let seen = notifier.current();

        let waiter = {
            let notifier = Arc::clone(&notifier);
            thread::spawn(move || notifier.wait_for_change(seen))
        };

        thread::sleep(Duration::from_millis(20));
        notifier.bump();
        assert_eq!(waiter.join().unwrap(), 1);
    }

    #[test]
    fn test_wait_timeout_without_change() {
        let notifier = ChangeNotifier::new();
        assert_eq!(
            notifier.wait_for_change_timeout(0, Duration::from_millis(10)),
            None
        );
        notifier.bump();
        assert_eq!(
            notifier.wait_for_change_timeout(0, Duration::from_millis(10)),
            Some(1)
        );
    }
}
