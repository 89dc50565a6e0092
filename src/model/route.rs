// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    str::FromStr,
    time::{Duration, SystemTime},
};

use serde::{Deserialize, Serialize};

/// An IP prefix, canonicalized so host bits beyond `length` are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Prefix {
    pub address: IpAddr,
    pub length: u8,
}

#[derive(Debug, thiserror::Error)]
pub enum PrefixError {
    #[error("prefix length {0} exceeds address width")]
    LengthOutOfRange(u8),
}

impl Prefix {
    /// Builds a canonical prefix, masking off any set host bits.
    pub fn new(address: IpAddr, length: u8) -> Result<Self, PrefixError> {
        let max_len = match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        };
        if length > max_len {
            return Err(PrefixError::LengthOutOfRange(length));
        }
        let masked = match address {
            IpAddr::V4(v4) => IpAddr::V4(mask_v4(v4, length)),
            IpAddr::V6(v6) => IpAddr::V6(mask_v6(v6, length)),
        };
        Ok(Prefix { address: masked, length })
    }

    pub fn is_v4(&self) -> bool {
        self.address.is_ipv4()
    }

    pub fn contains(&self, addr: IpAddr) -> bool {
        match (self.address, addr) {
            (IpAddr::V4(net), IpAddr::V4(a)) => {
                mask_v4(a, self.length) == net
            },
            (IpAddr::V6(net), IpAddr::V6(a)) => {
                mask_v6(a, self.length) == net
            },
            _ => false,
        }
    }
}

fn mask_v4(addr: Ipv4Addr, len: u8) -> Ipv4Addr {
    let bits = u32::from(addr);
    let mask: u32 = if len == 0 { 0 } else { !0u32 << (32 - len) };
    Ipv4Addr::from(bits & mask)
}

fn mask_v6(addr: Ipv6Addr, len: u8) -> Ipv6Addr {
    let bits = u128::from(addr);
    let mask: u128 = if len == 0 { 0 } else { !0u128 << (128 - len) };
    Ipv6Addr::from(bits & mask)
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.length)
    }
}

impl FromStr for Prefix {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = s
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("prefix {s:?} missing '/length'"))?;
        let address: IpAddr = addr.parse()?;
        let length: u8 = len.parse()?;
        Ok(Prefix::new(address, length)?)
    }
}

/// BGP well-known ORIGIN attribute value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Igp,
    Egp,
    Incomplete,
}

/// One segment of an AS_PATH attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AsPathSegment {
    Sequence(Vec<u32>),
    Set(Vec<u32>),
}

impl AsPathSegment {
    pub fn asns(&self) -> &[u32] {
        match self {
            AsPathSegment::Sequence(v) | AsPathSegment::Set(v) => v,
        }
    }
}

/// A standard (RFC 1997) BGP community, `high:low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StandardCommunity {
    pub high: u16,
    pub low: u16,
}

impl fmt::Display for StandardCommunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.high, self.low)
    }
}

impl FromStr for StandardCommunity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, v) = s
            .split_once(':')
            .ok_or_else(|| anyhow::anyhow!("community {s:?} must be \"high:low\""))?;
        Ok(StandardCommunity { high: a.parse()?, low: v.parse()? })
    }
}

/// A BGP extended community (RFC 4360): 8 raw bytes, plus a derived
/// type/subtype and value decoded from the first two and trailing six bytes
/// respectively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExtendedCommunity {
    pub raw: [u8; 8],
}

impl ExtendedCommunity {
    pub fn type_subtype(&self) -> (u8, u8) {
        (self.raw[0], self.raw[1])
    }

    pub fn value(&self) -> [u8; 6] {
        let mut v = [0u8; 6];
        v.copy_from_slice(&self.raw[2..8]);
        v
    }
}

impl fmt::Display for ExtendedCommunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.raw))
    }
}

impl FromStr for ExtendedCommunity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s)?;
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| anyhow::anyhow!("extended community must be 8 bytes"))?;
        Ok(ExtendedCommunity { raw })
    }
}

/// A BGP large community (RFC 8092), `global:d1:d2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LargeCommunity {
    pub global: u32,
    pub d1: u32,
    pub d2: u32,
}

impl fmt::Display for LargeCommunity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.global, self.d1, self.d2)
    }
}

impl FromStr for LargeCommunity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        let global = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("large community {s:?} missing fields"))?
            .parse()?;
        let d1 = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("large community {s:?} missing fields"))?
            .parse()?;
        let d2 = parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("large community {s:?} missing fields"))?
            .parse()?;
        if parts.next().is_some() {
            return Err(anyhow::anyhow!("large community {s:?} has extra fields"));
        }
        Ok(LargeCommunity { global, d1, d2 })
    }
}

/// A BGP `AGGREGATOR` attribute: the aggregating router's ASN and address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregator {
    pub asn: u32,
    pub address: IpAddr,
}

/// A single BGP path towards a prefix, as received from one peer session
/// (spec section 3). A prefix may carry several paths distinguished by
/// `path_id` (ADD-PATH).
///
/// `med` and `local_pref` are `Option`s rather than a value paired with a
/// separate present flag: BGP treats "attribute absent" and "attribute
/// present with value zero" as distinct, and `Option<u32>` carries that
/// distinction directly rather than through a side channel that is easy to
/// forget to check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BgpPath {
    pub path_id: u32,
    pub next_hop: IpAddr,
    pub origin: Origin,
    pub as_path: Vec<AsPathSegment>,
    pub med: Option<u32>,
    pub local_pref: Option<u32>,
    pub communities: Vec<StandardCommunity>,
    pub extended_communities: Vec<ExtendedCommunity>,
    pub large_communities: Vec<LargeCommunity>,
    pub aggregator: Option<Aggregator>,
    pub atomic_aggregate: bool,
    /// Carried transparently from the collector; the core does not derive
    /// these three flags.
    pub best: bool,
    pub filtered: bool,
    pub stale: bool,
    pub age: Duration,
    pub received_at: SystemTime,
}

/// A stored route: a prefix and every path currently advertised for it
/// (spec section 4.1, multi-path upsert). No two paths share a `path_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteEntry {
    pub prefix: Prefix,
    pub paths: Vec<BgpPath>,
}

impl RouteEntry {
    pub fn new(prefix: Prefix) -> Self {
        RouteEntry { prefix, paths: Vec::new() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_masks_host_bits() {
        let p = Prefix::new("10.0.0.5".parse().unwrap(), 24).unwrap();
        assert_eq!(p.address, "10.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(p.to_string(), "10.0.0.0/24");
    }

    #[test]
    fn prefix_rejects_length_out_of_range() {
        assert!(Prefix::new("10.0.0.1".parse().unwrap(), 33).is_err());
    }

    #[test]
    fn prefix_parses_from_str() {
        let p: Prefix = "192.168.1.1/24".parse().unwrap();
        assert_eq!(p.to_string(), "192.168.1.0/24");
    }

    #[test]
    fn prefix_contains_checks_mask() {
        let p = Prefix::new("10.0.0.0".parse().unwrap(), 8).unwrap();
        assert!(p.contains("10.2.0.1".parse().unwrap()));
        assert!(!p.contains("11.0.0.1".parse().unwrap()));
    }

    #[test]
    fn standard_community_round_trips() {
        let c = StandardCommunity { high: 65000, low: 100 };
        let parsed: StandardCommunity = c.to_string().parse().unwrap();
        assert_eq!(c, parsed);
    }

    #[test]
    fn large_community_round_trips() {
        let c = LargeCommunity { global: 65000, d1: 1, d2: 2 };
        let parsed: LargeCommunity = c.to_string().parse().unwrap();
        assert_eq!(c, parsed);
    }

    #[test]
    fn extended_community_round_trips() {
        let c = ExtendedCommunity { raw: [0, 2, 0xfd, 0xe8, 0, 0, 0, 100] };
        let parsed: ExtendedCommunity = c.to_string().parse().unwrap();
        assert_eq!(c, parsed);
    }
}
