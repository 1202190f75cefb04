//! Core types for tunnel neighbor resolution
//!
//! IPv4 and IPv6 share one key space: an IPv4 neighbor is stored under its
//! IPv4-mapped IPv6 address (`::ffff:a.b.c.d`), so hashing and equality are
//! identical for both families.
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - SI-10: Information Input Validation - Address and name formats bounded on construction

use crate::error::TnlNeighError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// Longest interface name the kernel accepts (IFNAMSIZ minus the NUL)
pub const MAX_INTERFACE_NAME_LEN: usize = 15;

/// A 48-bit Ethernet MAC address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    /// The zero/null MAC address (00:00:00:00:00:00).
    pub const ZERO: Self = Self([0, 0, 0, 0, 0, 0]);

    /// The broadcast MAC address (ff:ff:ff:ff:ff:ff).
    pub const BROADCAST: Self = Self([0xff, 0xff, 0xff, 0xff, 0xff, 0xff]);

    /// Creates a new MAC address from raw bytes.
    pub const fn new(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes of the MAC address.
    pub const fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0 == Self::ZERO.0
    }

    #[inline]
    pub fn is_broadcast(&self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.0[0], self.0[1], self.0[2], self.0[3], self.0[4], self.0[5]
        )
    }
}

impl FromStr for MacAddress {
    type Err = TnlNeighError;

    /// Parses `00:11:22:33:44:55` or `00-11-22-33-44-55`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || TnlNeighError::BadMacAddress(s.to_string());
        let separator = if s.contains(':') { ':' } else { '-' };

        let mut bytes = [0u8; 6];
        let mut parts = s.split(separator);
        for byte in bytes.iter_mut() {
            let part = parts.next().ok_or_else(bad)?;
            if part.is_empty() || part.len() > 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(bad());
            }
            *byte = u8::from_str_radix(part, 16).map_err(|_| bad())?;
        }
        if parts.next().is_some() {
            return Err(bad());
        }

        Ok(Self(bytes))
    }
}

impl TryFrom<String> for MacAddress {
    type Error = TnlNeighError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<MacAddress> for String {
    fn from(mac: MacAddress) -> String {
        mac.to_string()
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }
}

/// Interface (bridge) name, bounded to [`MAX_INTERFACE_NAME_LEN`] bytes.
///
/// Longer names are truncated on a character boundary, the same way a
/// fixed `IFNAMSIZ` buffer would clip them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct InterfaceName(String);

/// Clip `name` to at most [`MAX_INTERFACE_NAME_LEN`] bytes on a character
/// boundary. Borrows, so lookups can bound their key without allocating.
#[inline]
pub fn clip_interface_name(name: &str) -> &str {
    let mut end = name.len().min(MAX_INTERFACE_NAME_LEN);
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

impl InterfaceName {
    pub fn new(name: &str) -> Self {
        Self(clip_interface_name(name).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InterfaceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for InterfaceName {
    fn from(name: String) -> Self {
        if name.len() <= MAX_INTERFACE_NAME_LEN {
            Self(name)
        } else {
            Self::new(&name)
        }
    }
}

impl From<InterfaceName> for String {
    fn from(name: InterfaceName) -> String {
        name.0
    }
}

/// Compares against `other` clipped to the same bound as stored names.
impl PartialEq<str> for InterfaceName {
    fn eq(&self, other: &str) -> bool {
        self.0 == clip_interface_name(other)
    }
}

/// Neighbor network address in the unified 128-bit space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NeighborAddress(Ipv6Addr);

impl NeighborAddress {
    pub const fn new(addr: Ipv6Addr) -> Self {
        Self(addr)
    }

    pub const fn as_ipv6(&self) -> &Ipv6Addr {
        &self.0
    }

    /// The IPv4 address if this is an IPv4-mapped address.
    pub fn to_ipv4(&self) -> Option<Ipv4Addr> {
        self.0.to_ipv4_mapped()
    }

    pub fn is_ipv4(&self) -> bool {
        self.to_ipv4().is_some()
    }

    /// Back to the natural family: `V4` for mapped addresses.
    pub fn to_ip(&self) -> IpAddr {
        match self.to_ipv4() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(self.0),
        }
    }
}

impl From<Ipv4Addr> for NeighborAddress {
    fn from(addr: Ipv4Addr) -> Self {
        Self(addr.to_ipv6_mapped())
    }
}

impl From<Ipv6Addr> for NeighborAddress {
    fn from(addr: Ipv6Addr) -> Self {
        Self(addr)
    }
}

impl From<IpAddr> for NeighborAddress {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => v4.into(),
            IpAddr::V6(v6) => v6.into(),
        }
    }
}

impl fmt::Display for NeighborAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_ipv4() {
            Some(v4) => v4.fmt(f),
            None => self.0.fmt(f),
        }
    }
}

impl FromStr for NeighborAddress {
    type Err = TnlNeighError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<IpAddr>()
            .map(Self::from)
            .map_err(|_| TnlNeighError::BadIpAddress(s.to_string()))
    }
}

/// Cache key: one live binding per (interface, address).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NeighborKey {
    pub interface: InterfaceName,
    pub address: NeighborAddress,
}

impl NeighborKey {
    pub fn new(interface: impl Into<InterfaceName>, address: impl Into<NeighborAddress>) -> Self {
        Self {
            interface: interface.into(),
            address: address.into(),
        }
    }
}

impl fmt::Display for NeighborKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.interface, self.address)
    }
}

/// Point-in-time copy of a cached binding.
///
/// `expires` is measured in seconds of the cache's [`Clock`](crate::clock::Clock).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeighborEntry {
    pub interface: InterfaceName,
    pub address: NeighborAddress,
    pub mac: MacAddress,
    pub expires: u64,
}

impl NeighborEntry {
    pub fn key(&self) -> NeighborKey {
        NeighborKey {
            interface: self.interface.clone(),
            address: self.address,
        }
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.expires <= now
    }
}
