//! Grace-period reclamation for unlinked cache nodes
//!
//! Writers unlink a node and hand it here instead of freeing it. The node is
//! destroyed only once every epoch guard that was pinned before the unlink
//! has been dropped, so a reader still walking a bucket chain never touches
//! freed memory.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-16: Memory Protection - No reader observes freed memory

use crossbeam::epoch::{self, Guard, Shared};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
struct ReclaimCounters {
    retired: AtomicU64,
    reclaimed: AtomicU64,
}

/// Snapshot of reclamation progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Nodes handed over for deferred destruction
    pub retired: u64,
    /// Nodes actually destroyed
    pub reclaimed: u64,
}

impl ReclaimStats {
    /// Nodes unlinked but still waiting for their grace period
    pub fn pending(&self) -> u64 {
        self.retired.saturating_sub(self.reclaimed)
    }
}

/// Epoch-based deferred destruction.
#[derive(Debug, Clone, Default)]
pub struct ReclamationManager {
    counters: Arc<ReclaimCounters>,
}

impl ReclamationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the current thread. Anything reachable while the guard lives
    /// stays allocated.
    #[inline]
    pub fn pin(&self) -> Guard {
        epoch::pin()
    }

    /// Schedule an already unlinked node for destruction.
    ///
    /// # Safety
    ///
    /// `node` must be non-null, no longer reachable from the shared
    /// structure, and retired at most once.
    pub unsafe fn retire<T>(&self, guard: &Guard, node: Shared<'_, T>) {
        self.counters.retired.fetch_add(1, Ordering::Relaxed);
        let counters = Arc::clone(&self.counters);
        // SAFETY: the caller guarantees the node is unreachable, so once the
        // grace period ends nobody else holds a reference to it.
        unsafe {
            guard.defer_unchecked(move || {
                drop(node.into_owned());
                counters.reclaimed.fetch_add(1, Ordering::Relaxed);
            });
        }
    }

    /// Push this thread's deferred work to the global queue so it can run as
    /// soon as the epoch allows.
    pub fn flush(&self, guard: &Guard) {
        guard.flush();
    }

    pub fn stats(&self) -> ReclaimStats {
        ReclaimStats {
            retired: self.counters.retired.load(Ordering::Relaxed),
            reclaimed: self.counters.reclaimed.load(Ordering::Relaxed),
        }
    }
}
