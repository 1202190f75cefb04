//! Periodic eviction of idle neighbor bindings
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-5: Denial of Service Protection - Idle bindings do not accumulate
//! - SI-4: System Monitoring - Sweep results recorded in metrics

use crate::cache::NeighCache;
use crate::metrics::MetricsCollector;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default period between sweeps
pub const DEFAULT_AGING_INTERVAL: Duration = Duration::from_secs(1);

/// Full-table sweep run on every tick of the host's scheduling loop.
#[derive(Debug, Clone)]
pub struct AgingSweeper {
    cache: Arc<NeighCache>,
    metrics: Option<MetricsCollector>,
}

impl AgingSweeper {
    pub fn new(cache: Arc<NeighCache>) -> Self {
        Self {
            cache,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Evict every expired entry. Returns how many were removed; the cache
    /// version moves at most once per tick.
    pub fn tick(&self) -> usize {
        let start = Instant::now();
        let removed = self.cache.sweep();

        if let Some(metrics) = &self.metrics {
            metrics.record_sweep(removed, start.elapsed().as_secs_f64());
            metrics.set_cache_state(self.cache.len(), self.cache.notifier().current());
        }
        if removed > 0 {
            debug!(
                removed,
                elapsed_us = start.elapsed().as_micros() as u64,
                "Aging sweep evicted entries"
            );
        }
        removed
    }

    /// Drive [`tick`](Self::tick) every `period` until `shutdown` is set.
    pub async fn run(self, period: Duration, shutdown: Arc<AtomicBool>) {
        info!(period_ms = period.as_millis() as u64, "Aging sweeper started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            self.tick();
        }
        info!("Aging sweeper stopped");
    }
}
