//! Learning neighbor bindings from observed ARP and ND traffic
//!
//! The packet path hands over already parsed header fields. Each learner
//! validates the message type, upserts the binding, and reports which header
//! fields it consulted so the caller can install an exact-match flow for
//! later packets of the same shape.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-10: Information Input Validation - Message type checked before learning
//! - SC-7: Boundary Protection - Only resolution replies feed the cache

use crate::cache::{NeighCache, UpsertOutcome};
use crate::error::{Result, TnlNeighError};
use crate::metrics::MetricsCollector;
use crate::types::{InterfaceName, MacAddress, NeighborAddress};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Ethertype for ARP
pub const ETH_TYPE_ARP: u16 = 0x0806;
/// Ethertype for IPv6
pub const ETH_TYPE_IPV6: u16 = 0x86dd;
/// IP protocol number for ICMPv6
pub const IPPROTO_ICMPV6: u8 = 58;
/// ICMPv6 type for a neighbor advertisement
pub const ND_NEIGHBOR_ADVERT: u16 = 136;

/// Header fields a learner may consult
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FlowField {
    NwProto = 1 << 0,
    NwSrc = 1 << 1,
    ArpSha = 1 << 2,
    Ipv6Src = 1 << 3,
    Ipv6Dst = 1 << 4,
    NdTarget = 1 << 5,
    ArpTha = 1 << 6,
}

impl FlowField {
    pub const ALL: [FlowField; 7] = [
        Self::NwProto,
        Self::NwSrc,
        Self::ArpSha,
        Self::Ipv6Src,
        Self::Ipv6Dst,
        Self::NdTarget,
        Self::ArpTha,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::NwProto => "nw_proto",
            Self::NwSrc => "nw_src",
            Self::ArpSha => "arp_sha",
            Self::Ipv6Src => "ipv6_src",
            Self::Ipv6Dst => "ipv6_dst",
            Self::NdTarget => "nd_target",
            Self::ArpTha => "arp_tha",
        }
    }
}

/// Set of header fields that must match exactly
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowWildcards(u16);

impl FlowWildcards {
    pub const fn none() -> Self {
        Self(0)
    }

    pub fn with(mut self, field: FlowField) -> Self {
        self.set_exact(field);
        self
    }

    pub fn set_exact(&mut self, field: FlowField) {
        self.0 |= field as u16;
    }

    pub fn is_exact(&self, field: FlowField) -> bool {
        self.0 & field as u16 != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn fields(&self) -> impl Iterator<Item = FlowField> + '_ {
        FlowField::ALL.into_iter().filter(|f| self.is_exact(*f))
    }

    /// Fold another mask into this one.
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

impl fmt::Display for FlowWildcards {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.fields().map(|field| field.name()).collect();
        f.write_str(&names.join(","))
    }
}

/// Parsed header fields of an observed packet.
///
/// For ICMPv6 the message type travels in `tp_src` and the code in `tp_dst`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDescriptor {
    pub dl_type: u16,
    pub nw_proto: u8,
    pub nw_src: Ipv4Addr,
    pub ipv6_src: Ipv6Addr,
    pub ipv6_dst: Ipv6Addr,
    pub tp_src: u16,
    pub tp_dst: u16,
    pub arp_sha: MacAddress,
    pub arp_tha: MacAddress,
    pub nd_target: Ipv6Addr,
}

impl Default for FlowDescriptor {
    fn default() -> Self {
        Self {
            dl_type: 0,
            nw_proto: 0,
            nw_src: Ipv4Addr::UNSPECIFIED,
            ipv6_src: Ipv6Addr::UNSPECIFIED,
            ipv6_dst: Ipv6Addr::UNSPECIFIED,
            tp_src: 0,
            tp_dst: 0,
            arp_sha: MacAddress::ZERO,
            arp_tha: MacAddress::ZERO,
            nd_target: Ipv6Addr::UNSPECIFIED,
        }
    }
}

impl FlowDescriptor {
    /// An ARP packet from `sender_ip` / `sender_mac`. `opcode` lands in
    /// `nw_proto`, as the packet path stores it.
    pub fn arp(opcode: u8, sender_ip: Ipv4Addr, sender_mac: MacAddress) -> Self {
        Self {
            dl_type: ETH_TYPE_ARP,
            nw_proto: opcode,
            nw_src: sender_ip,
            arp_sha: sender_mac,
            ..Self::default()
        }
    }

    /// A neighbor advertisement for `target` carrying `target_mac`.
    pub fn neighbor_advert(
        src: Ipv6Addr,
        dst: Ipv6Addr,
        target: Ipv6Addr,
        target_mac: MacAddress,
    ) -> Self {
        Self {
            dl_type: ETH_TYPE_IPV6,
            nw_proto: IPPROTO_ICMPV6,
            ipv6_src: src,
            ipv6_dst: dst,
            tp_src: ND_NEIGHBOR_ADVERT,
            tp_dst: 0,
            nd_target: target,
            arp_tha: target_mac,
            ..Self::default()
        }
    }

    fn is_arp(&self) -> bool {
        self.dl_type == ETH_TYPE_ARP
    }

    fn is_neighbor_advert(&self) -> bool {
        self.dl_type == ETH_TYPE_IPV6
            && self.nw_proto == IPPROTO_ICMPV6
            && self.tp_src == ND_NEIGHBOR_ADVERT
            && self.tp_dst == 0
    }
}

/// Result of a successful snoop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnoopOutcome {
    /// Fields the learner read; they must be matched exactly
    pub consulted: FlowWildcards,
    /// Effect on the cache
    pub outcome: UpsertOutcome,
}

/// Which resolution protocol a learner handles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoopKind {
    Arp,
    NeighborDiscovery,
}

impl SnoopKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Arp => "arp",
            Self::NeighborDiscovery => "nd",
        }
    }
}

/// Drives [`NeighCache::upsert`] from snooped resolution traffic.
#[derive(Debug, Clone)]
pub struct Snooper {
    cache: Arc<NeighCache>,
    metrics: Option<MetricsCollector>,
}

impl Snooper {
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

    /// Learn the sender binding of an ARP packet.
    ///
    /// # NIST Controls
    /// - SI-10: Information Input Validation - Non-ARP ethertypes rejected
    #[instrument(skip(self, flow), fields(kind = "arp"))]
    pub fn snoop_arp(&self, flow: &FlowDescriptor, interface: &str) -> Result<SnoopOutcome> {
        if !flow.is_arp() {
            return Err(self.reject(
                SnoopKind::Arp,
                format!("ethertype {:#06x} is not ARP", flow.dl_type),
            ));
        }

        let consulted = FlowWildcards::none()
            .with(FlowField::NwProto)
            .with(FlowField::NwSrc)
            .with(FlowField::ArpSha);

        let outcome = self.learn(interface, flow.nw_src.into(), flow.arp_sha);
        Ok(SnoopOutcome { consulted, outcome })
    }

    /// Learn the target binding of an ND neighbor advertisement.
    ///
    /// # NIST Controls
    /// - SI-10: Information Input Validation - Only neighbor advertisements accepted
    #[instrument(skip(self, flow), fields(kind = "nd"))]
    pub fn snoop_nd(&self, flow: &FlowDescriptor, interface: &str) -> Result<SnoopOutcome> {
        if !flow.is_neighbor_advert() {
            return Err(self.reject(
                SnoopKind::NeighborDiscovery,
                format!(
                    "not a neighbor advertisement (ethertype {:#06x}, proto {}, type {}, code {})",
                    flow.dl_type, flow.nw_proto, flow.tp_src, flow.tp_dst
                ),
            ));
        }

        let consulted = FlowWildcards::none()
            .with(FlowField::Ipv6Src)
            .with(FlowField::Ipv6Dst)
            .with(FlowField::NdTarget)
            .with(FlowField::ArpTha);

        let outcome = self.learn(interface, flow.nd_target.into(), flow.arp_tha);
        Ok(SnoopOutcome { consulted, outcome })
    }

    /// Dispatch on the descriptor's ethertype.
    pub fn snoop(&self, flow: &FlowDescriptor, interface: &str) -> Result<SnoopOutcome> {
        if flow.dl_type == ETH_TYPE_ARP {
            self.snoop_arp(flow, interface)
        } else {
            self.snoop_nd(flow, interface)
        }
    }

    fn learn(&self, interface: &str, address: NeighborAddress, mac: MacAddress) -> UpsertOutcome {
        let outcome = self
            .cache
            .upsert(&InterfaceName::new(interface), address, mac);
        if let Some(metrics) = &self.metrics {
            metrics.record_upsert(outcome);
        }
        outcome
    }

    fn reject(&self, kind: SnoopKind, reason: String) -> TnlNeighError {
        debug!(kind = kind.label(), %reason, "Rejected snooped packet");
        if let Some(metrics) = &self.metrics {
            metrics.record_snoop_rejected(kind.label());
        }
        TnlNeighError::InvalidInput(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use pretty_assertions::assert_eq;

    const ARP_REPLY: u8 = 2;

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0x02, 0, 0, 0, 0, last])
    }

    fn snooper() -> (Snooper, Arc<NeighCache>) {
        let cache = Arc::new(NeighCache::new(CacheOptions::default()));
        (Snooper::new(cache.clone()), cache)
    }

    #[test]
    fn test_arp_learns_sender() {
        let (snooper, cache) = snooper();
        let ip = Ipv4Addr::new(10, 0, 0, 5);
        let flow = FlowDescriptor::arp(ARP_REPLY, ip, mac(1));

        let result = snooper.snoop_arp(&flow, "br0").unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Inserted);
        assert!(result.consulted.is_exact(FlowField::NwProto));
        assert!(result.consulted.is_exact(FlowField::NwSrc));
        assert!(result.consulted.is_exact(FlowField::ArpSha));
        assert!(!result.consulted.is_exact(FlowField::NdTarget));
        assert_eq!(result.consulted.to_string(), "nw_proto,nw_src,arp_sha");

        assert_eq!(cache.lookup("br0", ip.into()), Some(mac(1)));
    }

    #[test]
    fn test_arp_rejects_other_ethertypes() {
        let (snooper, cache) = snooper();
        let mut flow = FlowDescriptor::arp(ARP_REPLY, Ipv4Addr::new(10, 0, 0, 5), mac(1));
        flow.dl_type = 0x0800;

        let err = snooper.snoop_arp(&flow, "br0").unwrap_err();
        assert!(matches!(err, TnlNeighError::InvalidInput(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_nd_learns_target() {
        let (snooper, cache) = snooper();
        let target: Ipv6Addr = "fe80::1".parse().unwrap();
        let flow = FlowDescriptor::neighbor_advert(target, "ff02::1".parse().unwrap(), target, mac(2));

        let result = snooper.snoop_nd(&flow, "br0").unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Inserted);
        assert_eq!(
            result.consulted.fields().collect::<Vec<_>>(),
            vec![
                FlowField::Ipv6Src,
                FlowField::Ipv6Dst,
                FlowField::NdTarget,
                FlowField::ArpTha
            ]
        );
        assert_eq!(cache.lookup("br0", target.into()), Some(mac(2)));
    }

    #[test]
    fn test_nd_rejects_solicitation_and_other_traffic() {
        let (snooper, cache) = snooper();
        let target: Ipv6Addr = "fe80::1".parse().unwrap();
        let advert = FlowDescriptor::neighbor_advert(target, target, target, mac(2));

        let mut solicit = advert.clone();
        solicit.tp_src = 135;
        let mut bad_code = advert.clone();
        bad_code.tp_dst = 1;
        let mut udp = advert.clone();
        udp.nw_proto = 17;
        let arp = FlowDescriptor::arp(ARP_REPLY, Ipv4Addr::new(10, 0, 0, 5), mac(1));

        for flow in [solicit, bad_code, udp, arp] {
            let err = snooper.snoop_nd(&flow, "br0").unwrap_err();
            assert!(matches!(err, TnlNeighError::InvalidInput(_)));
        }
        assert!(cache.is_empty());
    }

    #[test]
    fn test_dispatch_by_ethertype() {
        let (snooper, cache) = snooper();
        let ip = Ipv4Addr::new(192, 168, 1, 1);
        snooper
            .snoop(&FlowDescriptor::arp(ARP_REPLY, ip, mac(7)), "br1")
            .unwrap();
        assert_eq!(cache.lookup("br1", ip.into()), Some(mac(7)));

        let junk = FlowDescriptor::default();
        assert!(snooper.snoop(&junk, "br1").is_err());
    }

    #[test]
    fn test_wildcards_union() {
        let a = FlowWildcards::none().with(FlowField::NwSrc);
        let b = FlowWildcards::none().with(FlowField::ArpTha);
        let both = a.union(b);
        assert!(both.is_exact(FlowField::NwSrc));
        assert!(both.is_exact(FlowField::ArpTha));
        assert!(FlowWildcards::none().is_empty());
    }
}
