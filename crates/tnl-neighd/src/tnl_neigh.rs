//! TnlNeigh - the cache handle handed to the dataplane
//!
//! One instance is built at startup and shared by forwarding threads,
//! learners, the aging loop and the control socket.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SC-7: Boundary Protection - Tunnel endpoint resolution for the dataplane

use crate::admin::{AdminOps, HostResolver, SystemResolver};
use crate::aging::AgingSweeper;
use crate::cache::NeighCache;
use crate::clock::{Clock, SystemClock};
use crate::config::TnlNeighConfig;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::snoop::{FlowDescriptor, SnoopOutcome, Snooper};
use crate::types::MacAddress;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Tunnel neighbor resolution service
#[derive(Debug, Clone)]
pub struct TnlNeigh {
    cache: Arc<NeighCache>,
    snooper: Snooper,
    sweeper: AgingSweeper,
    admin: AdminOps,
    metrics: MetricsCollector,
}

impl TnlNeigh {
    pub fn new(config: &TnlNeighConfig) -> Result<Self> {
        Self::with_parts(config, Arc::new(SystemClock::new()), Arc::new(SystemResolver))
    }

    pub fn with_clock(config: &TnlNeighConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_parts(config, clock, Arc::new(SystemResolver))
    }

    pub fn with_parts(
        config: &TnlNeighConfig,
        clock: Arc<dyn Clock>,
        resolver: Arc<dyn HostResolver>,
    ) -> Result<Self> {
        config.validate()?;
        let metrics = MetricsCollector::new()?;
        let cache = Arc::new(NeighCache::with_clock(config.cache_options(), clock));

        info!(
            idle_time_secs = config.idle_time_secs,
            buckets = config.buckets,
            "Initialized tunnel neighbor cache"
        );

        Ok(Self {
            snooper: Snooper::new(cache.clone()).with_metrics(metrics.clone()),
            sweeper: AgingSweeper::new(cache.clone()).with_metrics(metrics.clone()),
            admin: AdminOps::with_resolver(cache.clone(), resolver).with_metrics(metrics.clone()),
            cache,
            metrics,
        })
    }

    /// Resolve an IPv4 tunnel endpoint.
    #[inline]
    pub fn lookup_v4(&self, interface: &str, ip: Ipv4Addr) -> Option<MacAddress> {
        self.cache.lookup(interface, ip.into())
    }

    /// Resolve an IPv6 tunnel endpoint.
    #[inline]
    pub fn lookup_v6_or_nd(&self, interface: &str, ip: Ipv6Addr) -> Option<MacAddress> {
        self.cache.lookup(interface, ip.into())
    }

    pub fn snoop_arp(&self, flow: &FlowDescriptor, interface: &str) -> Result<SnoopOutcome> {
        self.snooper.snoop_arp(flow, interface)
    }

    pub fn snoop_nd(&self, flow: &FlowDescriptor, interface: &str) -> Result<SnoopOutcome> {
        self.snooper.snoop_nd(flow, interface)
    }

    /// Learn from pre-classified resolution traffic of either family.
    pub fn snoop(&self, flow: &FlowDescriptor, interface: &str) -> Result<SnoopOutcome> {
        self.snooper.snoop(flow, interface)
    }

    /// Drop one binding, e.g. when the tunnel using it is torn down.
    pub fn remove(&self, interface: &str, address: IpAddr) -> bool {
        let removed = self.cache.remove(interface, address.into());
        if removed {
            self.metrics.record_removed();
        }
        removed
    }

    /// One iteration of the host's periodic loop.
    pub fn tick(&self) -> usize {
        self.sweeper.tick()
    }

    pub fn current_version(&self) -> u64 {
        self.cache.notifier().current()
    }

    /// Block until the version differs from `last_seen`.
    pub fn wait_for_change(&self, last_seen: u64) -> u64 {
        self.cache.notifier().wait_for_change(last_seen)
    }

    pub fn wait_for_change_timeout(&self, last_seen: u64, timeout: Duration) -> Option<u64> {
        self.cache.notifier().wait_for_change_timeout(last_seen, timeout)
    }

    pub fn cache(&self) -> &Arc<NeighCache> {
        &self.cache
    }

    pub fn snooper(&self) -> &Snooper {
        &self.snooper
    }

    pub fn sweeper(&self) -> &AgingSweeper {
        &self.sweeper
    }

    pub fn admin(&self) -> &AdminOps {
        &self.admin
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }
}
