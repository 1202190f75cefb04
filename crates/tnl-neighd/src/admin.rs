//! Administrative commands: show, set and flush
//!
//! Commands arrive as text lines from the control socket:
//!
//! | Command            | Arguments            | Reply                      |
//! |--------------------|----------------------|----------------------------|
//! | `tnl/neigh/show`   | -                    | table of IP, MAC, Bridge   |
//! | `tnl/neigh/set`    | `BRIDGE ADDRESS MAC` | `OK`                       |
//! | `tnl/neigh/flush`  | -                    | `OK`                       |
//! | `tnl/neigh/metrics`| -                    | Prometheus text exposition |
//!
//! The `tnl/neigh/` prefix is optional; `tnl/arp/` is accepted as an alias.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AC-3: Access Enforcement - Commands reachable only through the local control socket
//! - CM-5: Access Restrictions for Change - Static bindings installed by operators
//! - SI-10: Information Input Validation - Address and MAC literals parsed before use

use crate::cache::{NeighCache, UpsertOutcome};
use crate::error::{Result, TnlNeighError};
use crate::metrics::MetricsCollector;
use crate::types::{InterfaceName, MacAddress, NeighborAddress};
use std::fmt::{self, Write as _};
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;
use tracing::{info, instrument};

/// Command namespace
pub const COMMAND_PREFIX: &str = "tnl/neigh/";

/// Older namespace still accepted for operator scripts
pub const LEGACY_COMMAND_PREFIX: &str = "tnl/arp/";

/// Width of the address column (INET6_ADDRSTRLEN)
const ADDRESS_COLUMN_WIDTH: usize = 46;

/// Hostname resolution used by `set` when the address is not a literal.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, host: &str) -> Option<IpAddr>;
}

/// Resolver backed by the system's name service.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str) -> Option<IpAddr> {
        (host, 0)
            .to_socket_addrs()
            .ok()?
            .next()
            .map(|addr| addr.ip())
    }
}

/// Thin command surface over the cache.
#[derive(Clone)]
pub struct AdminOps {
    cache: Arc<NeighCache>,
    resolver: Arc<dyn HostResolver>,
    metrics: Option<MetricsCollector>,
}

impl AdminOps {
    pub fn new(cache: Arc<NeighCache>) -> Self {
        Self::with_resolver(cache, Arc::new(SystemResolver))
    }

    pub fn with_resolver(cache: Arc<NeighCache>, resolver: Arc<dyn HostResolver>) -> Self {
        Self {
            cache,
            resolver,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: MetricsCollector) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Render the table. Row order follows the cache's iteration order.
    pub fn show(&self) -> String {
        let mut out = String::new();
        out.push_str("IP                                            MAC                 Bridge\n");
        out.push_str(&"=".repeat(74));
        out.push('\n');

        for entry in self.cache.iter() {
            // writing into a String cannot fail
            let _ = writeln!(
                out,
                "{:<width$}{}   {}",
                entry.address.to_string(),
                entry.mac,
                entry.interface,
                width = ADDRESS_COLUMN_WIDTH
            );
        }
        out
    }

    /// Install a static binding, resolving `host` if it is not a literal.
    #[instrument(skip(self))]
    pub fn set(&self, bridge: &str, host: &str, mac: &str) -> Result<UpsertOutcome> {
        let address = self.resolve(host)?;
        let mac: MacAddress = mac.parse()?;

        let outcome = self
            .cache
            .upsert(&InterfaceName::new(bridge), address, mac);
        if let Some(metrics) = &self.metrics {
            metrics.record_upsert(outcome);
        }
        info!(bridge, %address, %mac, ?outcome, "Static neighbor set");
        Ok(outcome)
    }

    /// Remove every binding.
    #[instrument(skip(self))]
    pub fn flush(&self) -> usize {
        let removed = self.cache.flush();
        if let Some(metrics) = &self.metrics {
            metrics.record_flush(removed);
            metrics.set_cache_state(self.cache.len(), self.cache.notifier().current());
        }
        removed
    }

    /// Prometheus exposition, empty when metrics are not attached.
    pub fn metrics(&self) -> Result<String> {
        match &self.metrics {
            Some(metrics) => {
                metrics.set_cache_state(self.cache.len(), self.cache.notifier().current());
                Ok(metrics.render()?)
            }
            None => Ok(String::new()),
        }
    }

    /// Parse and run one command line, returning the reply text.
    pub fn execute(&self, line: &str) -> Result<String> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Err(TnlNeighError::UnknownCommand(String::new()));
        };
        let args: Vec<&str> = words.collect();
        let command = Command::parse(name)?;

        if args.len() != command.arity() {
            return Err(TnlNeighError::Usage {
                command: command.name(),
                usage: command.usage(),
            });
        }

        match command {
            Command::Show => Ok(self.show()),
            Command::Set => {
                self.set(args[0], args[1], args[2])?;
                Ok("OK".to_string())
            }
            Command::Flush => {
                self.flush();
                Ok("OK".to_string())
            }
            Command::Metrics => self.metrics(),
        }
    }

    fn resolve(&self, host: &str) -> Result<NeighborAddress> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(ip.into());
        }
        self.resolver
            .resolve(host)
            .map(NeighborAddress::from)
            .ok_or_else(|| TnlNeighError::BadIpAddress(host.to_string()))
    }
}

impl fmt::Debug for AdminOps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminOps")
            .field("cache", &self.cache)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Show,
    Set,
    Flush,
    Metrics,
}

impl Command {
    pub fn parse(name: &str) -> Result<Self> {
        let bare = name
            .strip_prefix(COMMAND_PREFIX)
            .or_else(|| name.strip_prefix(LEGACY_COMMAND_PREFIX))
            .unwrap_or(name);
        match bare {
            "show" => Ok(Self::Show),
            "set" => Ok(Self::Set),
            "flush" => Ok(Self::Flush),
            "metrics" => Ok(Self::Metrics),
            _ => Err(TnlNeighError::UnknownCommand(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Show => "tnl/neigh/show",
            Self::Set => "tnl/neigh/set",
            Self::Flush => "tnl/neigh/flush",
            Self::Metrics => "tnl/neigh/metrics",
        }
    }

    pub fn usage(&self) -> &'static str {
        match self {
            Self::Set => "BRIDGE ADDRESS MAC",
            Self::Show | Self::Flush | Self::Metrics => "",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Set => 3,
            Self::Show | Self::Flush | Self::Metrics => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::net::Ipv4Addr;

    struct StaticResolver(HashMap<&'static str, IpAddr>);

    impl HostResolver for StaticResolver {
        fn resolve(&self, host: &str) -> Option<IpAddr> {
            self.0.get(host).copied()
        }
    }

    fn admin() -> (AdminOps, Arc<NeighCache>) {
        let cache = Arc::new(NeighCache::new(CacheOptions::default()));
        let resolver = StaticResolver(HashMap::from([(
            "vtep1.example",
            IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10)),
        )]));
        let admin = AdminOps::with_resolver(cache.clone(), Arc::new(resolver))
            .with_metrics(MetricsCollector::new().unwrap());
        (admin, cache)
    }

    #[test]
    fn test_set_literal_addresses() {
        let (admin, cache) = admin();
        assert_eq!(
            admin.execute("tnl/neigh/set br0 10.0.0.5 02:00:00:00:00:01").unwrap(),
            "OK"
        );
        assert_eq!(admin.execute("set br0 2001:db8::1 02:00:00:00:00:02").unwrap(), "OK");

        assert_eq!(
            cache.lookup("br0", Ipv4Addr::new(10, 0, 0, 5).into()),
            Some("02:00:00:00:00:01".parse().unwrap())
        );
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_set_resolves_hostname() {
        let (admin, cache) = admin();
        admin.set("br0", "vtep1.example", "02:00:00:00:00:03").unwrap();
        assert_eq!(
            cache.lookup("br0", Ipv4Addr::new(192, 0, 2, 10).into()),
            Some("02:00:00:00:00:03".parse().unwrap())
        );
    }

    #[test]
    fn test_set_reports_bad_input() {
        let (admin, cache) = admin();
        let err = admin.execute("set br0 no.such.host 02:00:00:00:00:01").unwrap_err();
        assert_eq!(err.to_string(), "bad IP address");

        let err = admin.execute("set br0 10.0.0.5 02:00:00:00:01").unwrap_err();
        assert_eq!(err.to_string(), "bad MAC address");

        assert!(cache.is_empty());
    }

    #[test]
    fn test_show_format() {
        let (admin, _) = admin();
        admin.set("br0", "10.0.0.5", "02:00:00:00:00:01").unwrap();

        let text = admin.execute("show").unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("IP"));
        assert!(lines[0].ends_with("Bridge"));
        assert!(lines[1].chars().all(|c| c == '='));
        assert_eq!(
            lines[2],
            format!("{:<46}02:00:00:00:00:01   br0", "10.0.0.5")
        );
    }

    #[test]
    fn test_flush_command() {
        let (admin, cache) = admin();
        assert_eq!(admin.execute("flush").unwrap(), "OK");
        assert_eq!(cache.notifier().current(), 0);

        admin.set("br0", "10.0.0.5", "02:00:00:00:00:01").unwrap();
        admin.set("br0", "10.0.0.6", "02:00:00:00:00:02").unwrap();
        let version = cache.notifier().current();
        assert_eq!(admin.execute("tnl/neigh/flush").unwrap(), "OK");
        assert!(cache.is_empty());
        assert_eq!(cache.notifier().current(), version + 1);
    }

    #[test]
    fn test_legacy_arp_namespace() {
        let (admin, cache) = admin();
        assert_eq!(Command::parse("tnl/arp/show").unwrap(), Command::Show);
        assert_eq!(
            admin.execute("tnl/arp/set br0 10.0.0.5 02:00:00:00:00:01").unwrap(),
            "OK"
        );
        assert_eq!(cache.len(), 1);
        assert!(admin.execute("tnl/arp/show").unwrap().contains("10.0.0.5"));
        assert_eq!(admin.execute("tnl/arp/flush").unwrap(), "OK");
        assert!(cache.is_empty());
        assert!(matches!(
            admin.execute("tnl/arp/metricsx"),
            Err(TnlNeighError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_usage_and_unknown() {
        let (admin, _) = admin();
        assert!(matches!(
            admin.execute("set br0 10.0.0.5"),
            Err(TnlNeighError::Usage { .. })
        ));
        assert!(matches!(
            admin.execute("show extra"),
            Err(TnlNeighError::Usage { .. })
        ));
        assert!(matches!(
            admin.execute("tnl/neigh/frobnicate"),
            Err(TnlNeighError::UnknownCommand(_))
        ));
        assert!(admin.execute("").is_err());
    }

    #[test]
    fn test_metrics_command() {
        let (admin, _) = admin();
        admin.set("br0", "10.0.0.5", "02:00:00:00:00:01").unwrap();
        let text = admin.execute("metrics").unwrap();
        assert!(text.contains("tnl_neighd_neighbors_learned_total 1"));
        assert!(text.contains("tnl_neighd_cache_entries 1"));
    }
}
