//! Cache hot-path benchmarks
//!
//! Measures lookup latency with and without concurrent writer churn.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use sonic_tnl_neighd::{CacheOptions, InterfaceName, MacAddress, NeighCache, NeighborAddress};
use std::hint::black_box;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

fn address(i: usize) -> NeighborAddress {
    Ipv4Addr::new(10, ((i >> 16) & 0xff) as u8, ((i >> 8) & 0xff) as u8, (i & 0xff) as u8).into()
}

fn mac(i: usize) -> MacAddress {
    MacAddress::new([0x02, 0, 0, ((i >> 16) & 0xff) as u8, ((i >> 8) & 0xff) as u8, (i & 0xff) as u8])
}

fn populated(entries: usize) -> Arc<NeighCache> {
    let cache = Arc::new(NeighCache::new(CacheOptions::default()));
    let bridge = InterfaceName::new("br0");
    for i in 0..entries {
        cache.upsert(&bridge, address(i), mac(i));
    }
    cache
}

fn bench_lookup_hit(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup_hit");

    for entries in [16, 1024, 16384] {
        let cache = populated(entries);
        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &entries, |b, &n| {
            let mut i = 0;
            b.iter(|| {
                i = (i + 1) % n;
                black_box(cache.lookup("br0", address(i)))
            });
        });
    }

    group.finish();
}

fn bench_lookup_miss(c: &mut Criterion) {
    let cache = populated(1024);
    c.bench_function("lookup_miss", |b| {
        b.iter(|| black_box(cache.lookup("br1", address(black_box(7)))))
    });
}

fn bench_lookup_under_churn(c: &mut Criterion) {
    let cache = populated(1024);
    let stop = Arc::new(AtomicBool::new(false));

    let writer = {
        let cache = cache.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            let bridge = InterfaceName::new("br0");
            let mut generation = 0usize;
            while !stop.load(Ordering::Relaxed) {
                for i in 0..1024 {
                    cache.upsert(&bridge, address(i), mac(i + generation));
                }
                generation = generation.wrapping_add(1);
            }
        })
    };

    c.bench_function("lookup_under_churn", |b| {
        let mut i = 0;
        b.iter(|| {
            i = (i + 1) % 1024;
            black_box(cache.lookup("br0", address(i)))
        });
    });

    stop.store(true, Ordering::Relaxed);
    let _ = writer.join();
}

fn bench_upsert(c: &mut Criterion) {
    let cache = populated(1024);
    let bridge = InterfaceName::new("br0");

    c.bench_function("upsert_refresh", |b| {
        b.iter(|| black_box(cache.upsert(&bridge, address(5), mac(5))))
    });

    let mut flip = false;
    c.bench_function("upsert_replace", |b| {
        b.iter(|| {
            flip = !flip;
            let m = if flip { mac(5) } else { mac(6) };
            black_box(cache.upsert(&bridge, address(5), m))
        })
    });
}

criterion_group!(
    benches,
    bench_lookup_hit,
    bench_lookup_miss,
    bench_lookup_under_churn,
    bench_upsert
);
criterion_main!(benches);
