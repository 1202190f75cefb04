//! Prometheus metrics collection for tnl-neighd
//!
//! The lookup fast path is not instrumented; everything here is
//! recorded on learner, aging and admin paths.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-6: Audit Record Review - Metrics available for analysis
//! - SI-4: System Monitoring - Learning, aging and rejection counters

use crate::cache::UpsertOutcome;
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector for the tunnel neighbor cache
///
/// # NIST Controls
/// - SI-4: System Monitoring - Centralized metrics collection
#[derive(Clone)]
pub struct MetricsCollector {
    // Counters
    pub neighbors_learned_total: Counter,
    pub neighbors_replaced_total: Counter,
    pub neighbors_refreshed_total: Counter,
    pub neighbors_aged_total: Counter,
    pub neighbors_flushed_total: Counter,
    pub neighbors_removed_total: Counter,
    pub snoop_rejected_total: CounterVec,

    // Gauges
    pub cache_entries: Gauge,
    pub cache_version: Gauge,

    // Histograms
    pub sweep_duration_seconds: Histogram,

    // Registry for export
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Counters
        let neighbors_learned_total = Counter::with_opts(Opts::new(
            "tnl_neighd_neighbors_learned_total",
            "Total number of new neighbor bindings",
        ))?;
        registry.register(Box::new(neighbors_learned_total.clone()))?;

        let neighbors_replaced_total = Counter::with_opts(Opts::new(
            "tnl_neighd_neighbors_replaced_total",
            "Total number of bindings replaced by a different MAC",
        ))?;
        registry.register(Box::new(neighbors_replaced_total.clone()))?;

        let neighbors_refreshed_total = Counter::with_opts(Opts::new(
            "tnl_neighd_neighbors_refreshed_total",
            "Total number of learns that only refreshed an existing binding",
        ))?;
        registry.register(Box::new(neighbors_refreshed_total.clone()))?;

        let neighbors_aged_total = Counter::with_opts(Opts::new(
            "tnl_neighd_neighbors_aged_total",
            "Total number of bindings removed by the aging sweep",
        ))?;
        registry.register(Box::new(neighbors_aged_total.clone()))?;

        let neighbors_flushed_total = Counter::with_opts(Opts::new(
            "tnl_neighd_neighbors_flushed_total",
            "Total number of bindings removed by flush",
        ))?;
        registry.register(Box::new(neighbors_flushed_total.clone()))?;

        let neighbors_removed_total = Counter::with_opts(Opts::new(
            "tnl_neighd_neighbors_removed_total",
            "Total number of bindings removed explicitly",
        ))?;
        registry.register(Box::new(neighbors_removed_total.clone()))?;

        let snoop_rejected_total = CounterVec::new(
            Opts::new(
                "tnl_neighd_snoop_rejected_total",
                "Snooped packets rejected as the wrong message type",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(snoop_rejected_total.clone()))?;

        // Gauges
        let cache_entries = Gauge::with_opts(Opts::new(
            "tnl_neighd_cache_entries",
            "Current number of cached bindings",
        ))?;
        registry.register(Box::new(cache_entries.clone()))?;

        let cache_version = Gauge::with_opts(Opts::new(
            "tnl_neighd_cache_version",
            "Current change sequence of the cache",
        ))?;
        registry.register(Box::new(cache_version.clone()))?;

        // Histograms
        let sweep_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "tnl_neighd_sweep_duration_seconds",
                "Aging sweep duration in seconds",
            )
            .buckets(vec![
                0.00001, 0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5,
            ]),
        )?;
        registry.register(Box::new(sweep_duration_seconds.clone()))?;

        Ok(Self {
            neighbors_learned_total,
            neighbors_replaced_total,
            neighbors_refreshed_total,
            neighbors_aged_total,
            neighbors_flushed_total,
            neighbors_removed_total,
            snoop_rejected_total,
            cache_entries,
            cache_version,
            sweep_duration_seconds,
            registry: Arc::new(registry),
        })
    }

    /// Record the effect of an upsert
    pub fn record_upsert(&self, outcome: UpsertOutcome) {
        match outcome {
            UpsertOutcome::Inserted => self.neighbors_learned_total.inc(),
            UpsertOutcome::Replaced { .. } => self.neighbors_replaced_total.inc(),
            UpsertOutcome::Refreshed => self.neighbors_refreshed_total.inc(),
        }
    }

    /// Record a rejected snoop
    pub fn record_snoop_rejected(&self, kind: &str) {
        self.snoop_rejected_total.with_label_values(&[kind]).inc();
    }

    /// Record one aging sweep
    pub fn record_sweep(&self, removed: usize, duration_secs: f64) {
        self.neighbors_aged_total.inc_by(removed as f64);
        self.sweep_duration_seconds.observe(duration_secs);
    }

    pub fn record_flush(&self, removed: usize) {
        self.neighbors_flushed_total.inc_by(removed as f64);
    }

    pub fn record_removed(&self) {
        self.neighbors_removed_total.inc();
    }

    /// Update table gauges
    pub fn set_cache_state(&self, entries: usize, version: u64) {
        self.cache_entries.set(entries as f64);
        self.cache_version.set(version as f64);
    }

    /// Prometheus text exposition of every registered metric
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

impl std::fmt::Debug for MetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsCollector")
            .field("entries", &self.cache_entries.get())
            .field("version", &self.cache_version.get())
            .finish()
    }
}
