//! Concurrency stress tests
//!
//! Readers hammer the lookup path while writers upsert, remove, flush and
//! sweep. Every MAC encodes the address it is bound to, so a reader that ever
//! observes a binding not produced by some writer fails the test.
//!
//! Run the same suite under Miri to catch reads of reclaimed nodes and data
//! races on the publish / unlink / retire path:
//!
//! ```text
//! MIRIFLAGS="-Zmiri-ignore-leaks" cargo +nightly miri test -p sonic-tnl-neighd --test stress_tests
//! ```
//!
//! `-Zmiri-ignore-leaks` is needed because garbage still queued in the
//! global epoch collector at process exit is never freed. Sizes shrink
//! under `cfg(miri)` so the interpreter finishes in minutes.

use pretty_assertions::assert_eq;
use sonic_tnl_neighd::{
    CacheOptions, InterfaceName, MacAddress, ManualClock, NeighCache, NeighborAddress,
};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

const ADDRESSES: u8 = if cfg!(miri) { 8 } else { 64 };
const READERS: usize = if cfg!(miri) { 2 } else { 4 };
const WRITER_ROUNDS: u32 = if cfg!(miri) { 30 } else { 2_000 };
const ITERATION_PASSES: usize = if cfg!(miri) { 10 } else { 500 };
const WRITER_REPEATS: usize = if cfg!(miri) { 3 } else { 200 };
const REFRESH_LOOKUPS: usize = if cfg!(miri) { 50 } else { 10_000 };

fn address(i: u8) -> NeighborAddress {
    Ipv4Addr::new(10, 9, 0, i).into()
}

/// Generation in bytes 2..4, address in byte 5.
fn mac_for(i: u8, generation: u16) -> MacAddress {
    let g = generation.to_be_bytes();
    MacAddress::new([0x02, 0x00, g[0], g[1], 0x00, i])
}

fn small_cache(clock: Arc<ManualClock>) -> Arc<NeighCache> {
    // few buckets so chains are long and removals hit the middle of them
    let options = CacheOptions {
        idle_time: Duration::from_secs(60),
        buckets: 8,
    };
    Arc::new(NeighCache::with_clock(options, clock))
}

#[test]
fn test_readers_never_observe_torn_bindings() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = small_cache(clock.clone());
    let stop = Arc::new(AtomicBool::new(false));
    let hits = Arc::new(AtomicU64::new(0));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let cache = cache.clone();
            let stop = stop.clone();
            let hits = hits.clone();
            thread::spawn(move || loop {
                // one last pass after the writer stops sees the final table
                let last_pass = stop.load(Ordering::Relaxed);
                for i in 0..ADDRESSES {
                    if let Some(mac) = cache.lookup("br0", address(i)) {
                        assert_eq!(mac.as_bytes()[0], 0x02);
                        assert_eq!(mac.as_bytes()[5], i, "binding for wrong address");
                        hits.fetch_add(1, Ordering::Relaxed);
                    }
                    // the other interface is never written
                    assert_eq!(cache.lookup("br1", address(i)), None);
                }
                if last_pass {
                    break;
                }
            })
        })
        .collect();

    let writer = {
        let cache = cache.clone();
        thread::spawn(move || {
            let bridge = InterfaceName::new("br0");
            for round in 0..WRITER_ROUNDS {
                let generation = (round % 7) as u16;
                for i in 0..ADDRESSES {
                    cache.upsert(&bridge, address(i), mac_for(i, generation));
                }
                for i in (0..ADDRESSES).step_by(3) {
                    cache.remove("br0", address(i));
                }
                if round % 25 == 0 {
                    cache.flush();
                }
                if round % 10 == 0 {
                    clock.advance(61);
                    cache.sweep();
                }
            }
        })
    };

    writer.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    for reader in readers {
        reader.join().unwrap();
    }

    assert!(hits.load(Ordering::Relaxed) > 0);
    for entry in cache.iter() {
        assert_eq!(entry.mac.as_bytes()[5], entry.address.to_ipv4().unwrap().octets()[3]);
    }
}

#[test]
fn test_iteration_during_churn_yields_valid_entries() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = small_cache(clock);
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let cache = cache.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let bridge = InterfaceName::new("br0");
            let mut generation = 0u16;
            while !stop.load(Ordering::Relaxed) {
                for i in 0..ADDRESSES {
                    cache.upsert(&bridge, address(i), mac_for(i, generation));
                }
                cache.flush();
                generation = generation.wrapping_add(1);
            }
        })
    };

    for _ in 0..ITERATION_PASSES {
        let mut seen = 0usize;
        for entry in cache.iter() {
            assert_eq!(entry.interface.as_str(), "br0");
            assert_eq!(entry.mac.as_bytes()[5], entry.address.to_ipv4().unwrap().octets()[3]);
            seen += 1;
        }
        assert!(seen <= ADDRESSES as usize);
    }

    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
}

#[test]
fn test_concurrent_writers_keep_keys_unique() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = small_cache(clock);

    let writers: Vec<_> = (0..4u16)
        .map(|w| {
            let cache = cache.clone();
            thread::spawn(move || {
                let bridge = InterfaceName::new("br0");
                for _ in 0..WRITER_REPEATS {
                    for i in 0..ADDRESSES {
                        cache.upsert(&bridge, address(i), mac_for(i, w));
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    assert_eq!(cache.len(), ADDRESSES as usize);
    assert_eq!(cache.iter().count(), ADDRESSES as usize);
}

#[test]
fn test_concurrent_refresh_never_moves_expiry_backwards() {
    let clock = Arc::new(ManualClock::new(100));
    let cache = small_cache(clock.clone());
    let key = address(1);
    cache.upsert(&InterfaceName::new("br0"), key, mac_for(1, 0));

    let readers: Vec<_> = (0..READERS)
        .map(|_| {
            let cache = cache.clone();
            thread::spawn(move || {
                for _ in 0..REFRESH_LOOKUPS {
                    cache.lookup("br0", key);
                }
            })
        })
        .collect();

    let mut last = 0;
    for _ in 0..100 {
        clock.advance(1);
        let expires = cache.entry("br0", key).unwrap().expires;
        assert!(expires >= last);
        last = expires;
    }
    for reader in readers {
        reader.join().unwrap();
    }

    cache.lookup("br0", key);
    assert_eq!(cache.entry("br0", key).unwrap().expires, 200 + 60);
}

#[test]
fn test_waiters_observe_every_writer_batch() {
    let clock = Arc::new(ManualClock::new(0));
    let cache = small_cache(clock);
    let notifier = cache.notifier().clone();

    let waiter = thread::spawn(move || {
        let mut seen = 0;
        while seen < 10 {
            let next = notifier.wait_for_change(seen);
            assert!(next > seen);
            seen = next;
        }
        seen
    });

    let bridge = InterfaceName::new("br0");
    for i in 0..10u8 {
        cache.upsert(&bridge, address(i), mac_for(i, 0));
    }

    assert!(waiter.join().unwrap() >= 10);
    let reclaim = cache.reclaim_stats();
    assert!(reclaim.reclaimed <= reclaim.retired);
}
