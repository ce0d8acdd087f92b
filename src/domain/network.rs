// Copyright (c) 2025 - Cowboy AI, Inc.
//! Network Value Objects with Validation Invariants

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use thiserror::Error;

/// Network validation error
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetworkError {
    #[error("Invalid IPv4 address format: {0}")]
    InvalidIpAddress(String),

    #[error("Invalid CIDR notation: {0}")]
    InvalidCidr(String),

    #[error("Invalid prefix length: {0} (must be 0-32)")]
    InvalidPrefixLength(u8),

    #[error("Host bits set in CIDR block {0} (expected network address {1})")]
    HostBitsSet(String, String),

    #[error("Invalid port: {0} (must be 1-65535)")]
    InvalidPort(u32),
}

/// IPv4 CIDR block value object
///
/// Represents an address block such as `10.0.0.0/16`.
/// Invariants:
/// - Valid IPv4 network address
/// - Prefix length 0-32
/// - No host bits set (the address is the network address of the block)
///
/// # Examples
///
/// ```rust
/// use webhook_topology::domain::Ipv4Cidr;
///
/// let vpc = Ipv4Cidr::new("10.0.0.0/16").unwrap();
/// let subnet = Ipv4Cidr::new("10.0.1.0/24").unwrap();
/// assert!(vpc.contains(&subnet));
/// assert!(Ipv4Cidr::new("10.0.1.7/24").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ipv4Cidr {
    network: Ipv4Addr,
    prefix_length: u8,
}

impl Ipv4Cidr {
    /// Create a CIDR block from `a.b.c.d/n` notation
    ///
    /// # Invariants
    /// - Prefix length 0-32
    /// - Address must be the block's network address
    pub fn new(cidr: impl AsRef<str>) -> Result<Self, NetworkError> {
        let cidr = cidr.as_ref().trim();

        let (addr_str, prefix_str) = cidr
            .split_once('/')
            .ok_or_else(|| NetworkError::InvalidCidr(cidr.to_string()))?;

        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| NetworkError::InvalidIpAddress(addr_str.to_string()))?;

        let prefix_length = prefix_str
            .parse::<u8>()
            .map_err(|_| NetworkError::InvalidCidr(cidr.to_string()))?;

        Self::from_parts(address, prefix_length)
    }

    /// Create from a network address and prefix length
    pub fn from_parts(network: Ipv4Addr, prefix_length: u8) -> Result<Self, NetworkError> {
        if prefix_length > 32 {
            return Err(NetworkError::InvalidPrefixLength(prefix_length));
        }

        let masked = Ipv4Addr::from(u32::from(network) & Self::mask_for(prefix_length));
        if masked != network {
            return Err(NetworkError::HostBitsSet(
                format!("{}/{}", network, prefix_length),
                format!("{}/{}", masked, prefix_length),
            ));
        }

        Ok(Self {
            network,
            prefix_length,
        })
    }

    fn mask_for(prefix_length: u8) -> u32 {
        if prefix_length == 0 {
            0
        } else {
            u32::MAX << (32 - u32::from(prefix_length))
        }
    }

    /// Network address of the block
    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    /// Prefix length
    pub fn prefix_length(&self) -> u8 {
        self.prefix_length
    }

    /// Last address in the block
    pub fn broadcast(&self) -> Ipv4Addr {
        Ipv4Addr::from(u32::from(self.network) | !Self::mask_for(self.prefix_length))
    }

    /// Number of addresses in the block
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_length))
    }

    /// Check whether `other` lies entirely within this block
    pub fn contains(&self, other: &Ipv4Cidr) -> bool {
        other.prefix_length >= self.prefix_length
            && u32::from(other.network) & Self::mask_for(self.prefix_length)
                == u32::from(self.network)
    }

    /// Check whether a single address lies within this block
    pub fn contains_addr(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & Self::mask_for(self.prefix_length) == u32::from(self.network)
    }

    /// Check whether the two blocks share any address
    pub fn overlaps(&self, other: &Ipv4Cidr) -> bool {
        self.contains(other) || other.contains(self)
    }

    /// Get as CIDR notation string
    pub fn as_cidr(&self) -> String {
        format!("{}/{}", self.network, self.prefix_length)
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_cidr())
    }
}

impl FromStr for Ipv4Cidr {
    type Err = NetworkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl Serialize for Ipv4Cidr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_cidr())
    }
}

impl<'de> Deserialize<'de> for Ipv4Cidr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(serde::de::Error::custom)
    }
}

/// TCP port value object (1-65535)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Port(u16);

impl Port {
    /// Default cache service port
    pub const REDIS: Port = Port(6379);

    /// Create a new port with validation
    pub fn new(port: u32) -> Result<Self, NetworkError> {
        if port == 0 || port > u32::from(u16::MAX) {
            return Err(NetworkError::InvalidPort(port));
        }
        Ok(Self(port as u16))
    }

    /// Get the port value
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl TryFrom<u32> for Port {
    type Error = NetworkError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u32 {
    fn from(port: Port) -> Self {
        u32::from(port.0)
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_parse() {
        let cidr = Ipv4Cidr::new("10.0.0.0/16").unwrap();
        assert_eq!(cidr.network().to_string(), "10.0.0.0");
        assert_eq!(cidr.prefix_length(), 16);
        assert_eq!(cidr.as_cidr(), "10.0.0.0/16");
        assert_eq!(cidr.size(), 65536);
        assert_eq!(cidr.broadcast().to_string(), "10.0.255.255");
    }

    #[test]
    fn test_invalid_cidr() {
        assert!(Ipv4Cidr::new("10.0.0.0").is_err()); // Missing prefix
        assert!(Ipv4Cidr::new("999.0.0.0/8").is_err());
        assert!(Ipv4Cidr::new("10.0.0.0/33").is_err());
        assert!(matches!(
            Ipv4Cidr::new("10.0.1.5/24"),
            Err(NetworkError::HostBitsSet(_, _))
        ));
    }

    #[test]
    fn test_containment() {
        let vpc = Ipv4Cidr::new("10.0.0.0/16").unwrap();
        assert!(vpc.contains(&Ipv4Cidr::new("10.0.1.0/24").unwrap()));
        assert!(vpc.contains(&vpc));
        assert!(!vpc.contains(&Ipv4Cidr::new("10.1.0.0/24").unwrap()));
        assert!(!vpc.contains(&Ipv4Cidr::new("10.0.0.0/8").unwrap()));
        assert!(vpc.contains_addr("10.0.200.3".parse().unwrap()));
    }

    #[test]
    fn test_overlap() {
        let a = Ipv4Cidr::new("10.0.0.0/23").unwrap();
        let b = Ipv4Cidr::new("10.0.1.0/24").unwrap();
        let c = Ipv4Cidr::new("10.0.2.0/24").unwrap();
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
    }

    #[test]
    fn test_zero_prefix_contains_everything() {
        let all = Ipv4Cidr::new("0.0.0.0/0").unwrap();
        assert!(all.contains(&Ipv4Cidr::new("192.168.0.0/16").unwrap()));
        assert_eq!(all.size(), 1u64 << 32);
    }

    #[test]
    fn test_serde_as_string() {
        let cidr = Ipv4Cidr::new("10.0.1.0/24").unwrap();
        let json = serde_json::to_string(&cidr).unwrap();
        assert_eq!(json, "\"10.0.1.0/24\"");
        let back: Ipv4Cidr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cidr);
        assert!(serde_json::from_str::<Ipv4Cidr>("\"10.0.1.1/24\"").is_err());
    }

    #[test]
    fn test_port() {
        assert_eq!(Port::new(6379).unwrap().value(), 6379);
        assert!(Port::new(0).is_err());
        assert!(Port::new(70000).is_err());
    }
}
