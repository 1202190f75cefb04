//! Concurrent neighbor cache keyed by (interface, address)
//!
//! # Concurrency
//!
//! ```text
//!   lookup (many threads)          upsert / remove / flush / sweep
//!          │                                   │
//!     epoch::pin()                      writer.lock()   (one at a time)
//!          │                                   │
//!          ▼                                   ▼
//!   ┌──────────┬──────────┬─────┬──────────┐
//!   │ bucket 0 │ bucket 1 │ ... │ bucket N │   Atomic<Node> heads
//!   └────┬─────┴──────────┴─────┴──────────┘
//!        ▼
//!      Node ──next──▶ Node ──next──▶ null
//! ```
//!
//! Readers never take the writer lock. A node is fully built before it is
//! published with a release store at the head of its bucket, and it is
//! unlinked before it is handed to the [`ReclamationManager`], which frees it
//! only after every reader that might still see it has unpinned.
//!
//! The only field a reader writes is the entry expiry, an atomic updated with
//! `fetch_max` so racing refreshes can never move it backwards.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-5: Denial of Service Protection - Lookups never wait on writers
//! - SI-16: Memory Protection - Removed entries freed only after a grace period
//! - CM-8: System Component Inventory - Current neighbor bindings

use crate::clock::{Clock, SystemClock};
use crate::notifier::ChangeNotifier;
use crate::reclaim::{ReclaimStats, ReclamationManager};
use crate::types::{InterfaceName, MacAddress, NeighborAddress, NeighborEntry, clip_interface_name};
use ahash::RandomState;
use crossbeam::epoch::{self, Atomic, Guard, Owned};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Default idle lifetime of an entry (seconds)
pub const DEFAULT_IDLE_TIME_SECS: u64 = 15 * 60;

/// Default bucket count
pub const DEFAULT_BUCKETS: usize = 1024;

/// Largest bucket count a cache will allocate
pub const MAX_BUCKETS: usize = 1 << 20;

struct Node {
    hash: u64,
    interface: InterfaceName,
    address: NeighborAddress,
    mac: MacAddress,
    expires: AtomicU64,
    next: Atomic<Node>,
}

impl Node {
    #[inline]
    fn matches(&self, hash: u64, interface: &str, address: &NeighborAddress) -> bool {
        self.hash == hash && self.address == *address && self.interface.as_str() == interface
    }

    #[inline]
    fn refresh(&self, until: u64) {
        self.expires.fetch_max(until, Ordering::Relaxed);
    }

    fn snapshot(&self) -> NeighborEntry {
        NeighborEntry {
            interface: self.interface.clone(),
            address: self.address,
            mac: self.mac,
            expires: self.expires.load(Ordering::Relaxed),
        }
    }
}

/// What an upsert did to the table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No binding existed; one was created
    Inserted,
    /// A binding with a different MAC was replaced
    Replaced { previous: MacAddress },
    /// Same MAC already bound; only the expiry moved
    Refreshed,
}

impl UpsertOutcome {
    /// True when the bound MAC moved, i.e. consumers must re-resolve.
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Refreshed)
    }
}

/// Sizing and lifetime knobs for [`NeighCache`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOptions {
    /// How long an entry lives after its last refresh
    pub idle_time: Duration,
    /// Bucket count, rounded up to a power of two and capped at
    /// [`MAX_BUCKETS`]
    pub buckets: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            idle_time: Duration::from_secs(DEFAULT_IDLE_TIME_SECS),
            buckets: DEFAULT_BUCKETS,
        }
    }
}

/// Neighbor resolution table shared by forwarding threads and learners.
pub struct NeighCache {
    buckets: Box<[Atomic<Node>]>,
    mask: usize,
    hasher: RandomState,
    writer: Mutex<()>,
    len: AtomicUsize,
    idle_time: u64,
    clock: Arc<dyn Clock>,
    notifier: Arc<ChangeNotifier>,
    reclaimer: ReclamationManager,
}

impl NeighCache {
    pub fn new(options: CacheOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock::new()))
    }

    pub fn with_clock(options: CacheOptions, clock: Arc<dyn Clock>) -> Self {
        let count = options.buckets.clamp(1, MAX_BUCKETS).next_power_of_two();
        let buckets = (0..count).map(|_| Atomic::null()).collect();

        Self {
            buckets,
            mask: count - 1,
            hasher: RandomState::new(),
            writer: Mutex::new(()),
            len: AtomicUsize::new(0),
            idle_time: idle_secs(options.idle_time),
            clock,
            notifier: Arc::new(ChangeNotifier::new()),
            reclaimer: ReclamationManager::new(),
        }
    }

    #[inline]
    fn hash(&self, address: &NeighborAddress) -> u64 {
        self.hasher.hash_one(address)
    }

    #[inline]
    fn bucket(&self, hash: u64) -> &Atomic<Node> {
        &self.buckets[hash as usize & self.mask]
    }

    #[inline]
    fn expiry_from_now(&self) -> u64 {
        self.clock.now().saturating_add(self.idle_time)
    }

    fn find<'g>(
        &'g self,
        hash: u64,
        interface: &str,
        address: &NeighborAddress,
        guard: &'g Guard,
    ) -> Option<&'g Node> {
        let mut cur = self.bucket(hash).load(Ordering::Acquire, guard);
        // SAFETY: nodes reachable under a pinned guard are not freed until
        // the guard is dropped.
        while let Some(node) = unsafe { cur.as_ref() } {
            if node.matches(hash, interface, address) {
                return Some(node);
            }
            cur = node.next.load(Ordering::Acquire, guard);
        }
        None
    }

    /// Resolve `address` on `interface`, extending the entry's lifetime on a
    /// hit. Never blocks on writers.
    pub fn lookup(&self, interface: &str, address: NeighborAddress) -> Option<MacAddress> {
        let interface = clip_interface_name(interface);
        let hash = self.hash(&address);
        let guard = self.reclaimer.pin();
        let node = self.find(hash, interface, &address, &guard)?;
        node.refresh(self.expiry_from_now());
        Some(node.mac)
    }

    /// Snapshot of one entry without refreshing it.
    pub fn entry(&self, interface: &str, address: NeighborAddress) -> Option<NeighborEntry> {
        let interface = clip_interface_name(interface);
        let hash = self.hash(&address);
        let guard = self.reclaimer.pin();
        self.find(hash, interface, &address, &guard)
            .map(Node::snapshot)
    }

    /// Bind `address` on `interface` to `mac`.
    ///
    /// The same MAC only refreshes the expiry. A different MAC unlinks the
    /// old entry and publishes a new one; readers see one or the other.
    #[instrument(skip_all, fields(interface = %interface, address = %address, mac = %mac))]
    pub fn upsert(
        &self,
        interface: &InterfaceName,
        address: NeighborAddress,
        mac: MacAddress,
    ) -> UpsertOutcome {
        let hash = self.hash(&address);
        let until = self.expiry_from_now();
        let guard = self.reclaimer.pin();
        let writer = self.writer.lock();

        let outcome = match self.find(hash, interface.as_str(), &address, &guard) {
            Some(node) if node.mac == mac => {
                node.refresh(until);
                return UpsertOutcome::Refreshed;
            }
            Some(node) => {
                let previous = node.mac;
                self.unlink(hash, node, &guard);
                UpsertOutcome::Replaced { previous }
            }
            None => UpsertOutcome::Inserted,
        };

        self.link(
            hash,
            Node {
                hash,
                interface: interface.clone(),
                address,
                mac,
                expires: AtomicU64::new(until),
                next: Atomic::null(),
            },
            &guard,
        );
        drop(writer);

        let version = self.notifier.bump();
        debug!(?outcome, version, "Neighbor bound");
        outcome
    }

    /// Remove the binding for `address` on `interface`.
    #[instrument(skip_all, fields(interface = %interface, address = %address))]
    pub fn remove(&self, interface: &str, address: NeighborAddress) -> bool {
        let interface = clip_interface_name(interface);
        let hash = self.hash(&address);
        let guard = self.reclaimer.pin();
        let writer = self.writer.lock();

        let removed = match self.find(hash, interface, &address, &guard) {
            Some(node) => self.unlink(hash, node, &guard),
            None => false,
        };
        drop(writer);

        if removed {
            let version = self.notifier.bump();
            debug!(version, "Neighbor removed");
        }
        removed
    }

    /// Remove every entry. Bumps the version once if anything was removed.
    #[instrument(skip_all)]
    pub fn flush(&self) -> usize {
        let removed = self.evict_where(|_| true);
        if removed > 0 {
            let version = self.notifier.bump();
            info!(removed, version, "Neighbor cache flushed");
        }
        removed
    }

    /// Remove every entry whose expiry has passed. Bumps the version once if
    /// anything was removed.
    #[instrument(skip_all)]
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let removed = self.evict_where(|node| node.expires.load(Ordering::Relaxed) <= now);
        if removed > 0 {
            let version = self.notifier.bump();
            info!(removed, version, remaining = self.len(), "Aged out neighbors");
        }
        removed
    }

    /// Lazy traversal of the table.
    ///
    /// Entries inserted or removed concurrently may or may not be observed.
    /// Removed entries stay allocated until the iterator is dropped, so do not
    /// hold one for long.
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            buckets: &self.buckets,
            guard: self.reclaimer.pin(),
            bucket: 0,
            cursor: std::ptr::null(),
        }
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Idle lifetime in seconds
    pub fn idle_time(&self) -> u64 {
        self.idle_time
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn notifier(&self) -> &Arc<ChangeNotifier> {
        &self.notifier
    }

    pub fn reclaim_stats(&self) -> ReclaimStats {
        self.reclaimer.stats()
    }

    // Writer lock must be held.
    fn link(&self, hash: u64, node: Node, guard: &Guard) {
        let bucket = self.bucket(hash);
        let node = Owned::new(node);
        node.next.store(bucket.load(Ordering::Relaxed, guard), Ordering::Relaxed);
        bucket.store(node, Ordering::Release);
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    // Writer lock must be held.
    fn unlink<'g>(&'g self, hash: u64, target: &Node, guard: &'g Guard) -> bool {
        let mut link = self.bucket(hash);
        loop {
            let cur = link.load(Ordering::Acquire, guard);
            // SAFETY: guard is pinned.
            let Some(node) = (unsafe { cur.as_ref() }) else {
                return false;
            };
            if std::ptr::eq(node, target) {
                link.store(node.next.load(Ordering::Acquire, guard), Ordering::Release);
                self.len.fetch_sub(1, Ordering::Relaxed);
                // SAFETY: just unlinked under the writer lock; nobody else can
                // unlink it again.
                unsafe { self.reclaimer.retire(guard, cur) };
                return true;
            }
            link = &node.next;
        }
    }

    /// Unlink every node for which `evict` returns true, in one writer
    /// critical section.
    fn evict_where(&self, mut evict: impl FnMut(&Node) -> bool) -> usize {
        let guard = self.reclaimer.pin();
        let _writer = self.writer.lock();
        let mut removed = 0;

        for bucket in self.buckets.iter() {
            let mut link = bucket;
            loop {
                let cur = link.load(Ordering::Acquire, &guard);
                // SAFETY: guard is pinned.
                let Some(node) = (unsafe { cur.as_ref() }) else {
                    break;
                };
                if evict(node) {
                    link.store(node.next.load(Ordering::Acquire, &guard), Ordering::Release);
                    // SAFETY: unlinked above under the writer lock.
                    unsafe { self.reclaimer.retire(&guard, cur) };
                    removed += 1;
                } else {
                    link = &node.next;
                }
            }
        }

        self.len.fetch_sub(removed, Ordering::Relaxed);
        self.reclaimer.flush(&guard);
        removed
    }
}

/// Whole seconds of idle lifetime, rounding any fraction up so a sub-second
/// setting never means "expire immediately".
fn idle_secs(idle_time: Duration) -> u64 {
    let secs = idle_time.as_secs();
    if idle_time.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs
    }
}

impl Default for NeighCache {
    fn default() -> Self {
        Self::new(CacheOptions::default())
    }
}

impl fmt::Debug for NeighCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NeighCache")
            .field("buckets", &self.buckets.len())
            .field("len", &self.len())
            .field("idle_time", &self.idle_time)
            .field("version", &self.notifier.current())
            .finish()
    }
}

impl Drop for NeighCache {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out concurrent readers and writers, so
        // every linked node is exclusively ours. Already retired nodes are
        // not linked and are left to the collector.
        unsafe {
            let guard = epoch::unprotected();
            for bucket in self.buckets.iter() {
                let mut cur = bucket.load(Ordering::Relaxed, guard);
                while !cur.is_null() {
                    let next = cur.deref().next.load(Ordering::Relaxed, guard);
                    drop(cur.into_owned());
                    cur = next;
                }
            }
        }
    }
}

/// Iterator returned by [`NeighCache::iter`]
pub struct Iter<'a> {
    buckets: &'a [Atomic<Node>],
    guard: Guard,
    bucket: usize,
    cursor: *const Node,
}

impl Iterator for Iter<'_> {
    type Item = NeighborEntry;

    fn next(&mut self) -> Option<NeighborEntry> {
        loop {
            // SAFETY: `cursor` was loaded under `self.guard`, which stays
            // pinned for the iterator's whole life.
            if let Some(node) = unsafe { self.cursor.as_ref() } {
                self.cursor = node.next.load(Ordering::Acquire, &self.guard).as_raw();
                return Some(node.snapshot());
            }
            let head = self.buckets.get(self.bucket)?;
            self.bucket += 1;
            self.cursor = head.load(Ordering::Acquire, &self.guard).as_raw();
        }
    }
}
