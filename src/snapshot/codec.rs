// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Binary envelope for the route-store snapshot (spec section 4.2).
//!
//! Hand-rolled big-endian encode/decode rather than a generic serde binary
//! format: the envelope's versioning and the byte-exact community layout are
//! themselves part of the contract (testable property 4), the way the
//! teacher hand-writes its Basic-Header-Segment layout instead of deriving
//! it. Every length is written before the bytes it counts, mirroring the
//! teacher's length-prefixed Data-Segment framing.

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use crate::model::{
    Aggregator, AsPathSegment, BgpPath, ExtendedCommunity, LargeCommunity, LgTargetId,
    Origin, Prefix, RouteEntry, StandardCommunity,
};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unexpected end of snapshot data")]
    UnexpectedEof,
    #[error("snapshot version {found} is not supported (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },
    #[error("invalid address family tag {0}")]
    BadFamilyTag(u8),
    #[error("invalid origin tag {0}")]
    BadOriginTag(u8),
    #[error("invalid as-path segment tag {0}")]
    BadSegmentTag(u8),
    #[error("string is not valid utf-8: {0}")]
    BadUtf8(#[from] std::string::FromUtf8Error),
    #[error("prefix error: {0}")]
    Prefix(#[from] crate::model::PrefixError),
}

type Result<T> = std::result::Result<T, CodecError>;

/// One target's worth of routes, as handed to/from the codec by the
/// snapshot scheduler. Keeps the codec decoupled from [`crate::store::RouteStore`]'s
/// internal locking.
pub struct TargetSnapshot {
    pub target: LgTargetId,
    pub entries: Vec<RouteEntry>,
}

/// The full decoded envelope.
pub struct Snapshot {
    pub timestamp: SystemTime,
    pub targets: Vec<TargetSnapshot>,
}

pub fn encode(targets: &[TargetSnapshot], timestamp: SystemTime) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.extend_from_slice(&SNAPSHOT_VERSION.to_be_bytes());
    buf.extend_from_slice(&unix_millis(timestamp).to_be_bytes());
    write_u32(&mut buf, targets.len() as u32);
    for t in targets {
        write_string(&mut buf, &t.target.collector_id);
        write_string(&mut buf, &t.target.session_id);
        write_u32(&mut buf, t.entries.len() as u32);
        for entry in &t.entries {
            write_prefix(&mut buf, &entry.prefix);
            write_u32(&mut buf, entry.paths.len() as u32);
            for path in &entry.paths {
                write_path(&mut buf, path);
            }
        }
    }
    buf
}

pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let mut cur = Cursor { bytes, pos: 0 };
    let version = cur.read_u32()?;
    if version != SNAPSHOT_VERSION {
        return Err(CodecError::UnsupportedVersion {
            found: version,
            expected: SNAPSHOT_VERSION,
        });
    }
    let millis = cur.read_i64()?;
    let timestamp = UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64);

    let target_count = cur.read_u32()?;
    let mut targets = Vec::with_capacity(target_count as usize);
    for _ in 0..target_count {
        let collector_id = cur.read_string()?;
        let session_id = cur.read_string()?;
        let entry_count = cur.read_u32()?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let prefix = cur.read_prefix()?;
            let path_count = cur.read_u32()?;
            let mut paths = Vec::with_capacity(path_count as usize);
            for _ in 0..path_count {
                paths.push(cur.read_path()?);
            }
            entries.push(RouteEntry { prefix, paths });
        }
        targets.push(TargetSnapshot {
            target: LgTargetId::new(collector_id, session_id),
            entries,
        });
    }

    Ok(Snapshot { timestamp, targets })
}

/// Groups a flat per-target entry dump into the `{prefix -> entry}` map
/// `RouteStore::replace_all` expects.
pub fn entries_to_map(entries: Vec<RouteEntry>) -> HashMap<Prefix, RouteEntry> {
    entries.into_iter().map(|e| (e.prefix, e)).collect()
}

fn unix_millis(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_millis() as i64).unwrap_or(0)
}

fn write_u8(buf: &mut Vec<u8>, v: u8) {
    buf.push(v);
}

fn write_u16(buf: &mut Vec<u8>, v: u16) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

fn write_bool(buf: &mut Vec<u8>, v: bool) {
    buf.push(v as u8);
}

fn write_string(buf: &mut Vec<u8>, s: &str) {
    write_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

fn write_addr(buf: &mut Vec<u8>, addr: IpAddr) {
    match addr {
        IpAddr::V4(v4) => {
            write_u8(buf, 4);
            buf.extend_from_slice(&v4.octets());
        },
        IpAddr::V6(v6) => {
            write_u8(buf, 6);
            buf.extend_from_slice(&v6.octets());
        },
    }
}

fn write_prefix(buf: &mut Vec<u8>, p: &Prefix) {
    write_addr(buf, p.address);
    write_u8(buf, p.length);
}

fn write_path(buf: &mut Vec<u8>, path: &BgpPath) {
    write_u32(buf, path.path_id);
    write_addr(buf, path.next_hop);
    write_u8(buf, match path.origin {
        Origin::Igp => 0,
        Origin::Egp => 1,
        Origin::Incomplete => 2,
    });

    write_u16(buf, path.as_path.len() as u16);
    for seg in &path.as_path {
        let (tag, asns) = match seg {
            AsPathSegment::Sequence(v) => (0u8, v),
            AsPathSegment::Set(v) => (1u8, v),
        };
        write_u8(buf, tag);
        write_u16(buf, asns.len() as u16);
        for asn in asns {
            write_u32(buf, *asn);
        }
    }

    write_bool(buf, path.med.is_some());
    write_u32(buf, path.med.unwrap_or(0));
    write_bool(buf, path.local_pref.is_some());
    write_u32(buf, path.local_pref.unwrap_or(0));

    write_u16(buf, path.communities.len() as u16);
    for c in &path.communities {
        write_u16(buf, c.high);
        write_u16(buf, c.low);
    }

    write_u16(buf, path.extended_communities.len() as u16);
    for c in &path.extended_communities {
        buf.extend_from_slice(&c.raw);
    }

    write_u16(buf, path.large_communities.len() as u16);
    for c in &path.large_communities {
        write_u32(buf, c.global);
        write_u32(buf, c.d1);
        write_u32(buf, c.d2);
    }

    write_bool(buf, path.aggregator.is_some());
    if let Some(agg) = path.aggregator {
        write_u32(buf, agg.asn);
        write_addr(buf, agg.address);
    }

    write_bool(buf, path.atomic_aggregate);
    write_bool(buf, path.best);
    write_bool(buf, path.filtered);
    write_bool(buf, path.stale);
    write_u64(buf, path.age.as_millis() as u64);
    write_u64(buf, unix_millis(path.received_at).max(0) as u64);
}

struct Cursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let s = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().expect("length checked above")))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().expect("length checked above")))
    }

    fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().expect("length checked above")))
    }

    fn read_i64(&mut self) -> Result<i64> {
        Ok(self.read_u64()? as i64)
    }

    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let bytes = self.take(len)?;
        Ok(String::from_utf8(bytes.to_vec())?)
    }

    fn read_addr(&mut self) -> Result<IpAddr> {
        match self.read_u8()? {
            4 => {
                let b = self.take(4)?;
                Ok(IpAddr::V4(Ipv4Addr::new(b[0], b[1], b[2], b[3])))
            },
            6 => {
                let b: [u8; 16] = self.take(16)?.try_into().expect("length checked above");
                Ok(IpAddr::V6(Ipv6Addr::from(b)))
            },
            tag => Err(CodecError::BadFamilyTag(tag)),
        }
    }

    fn read_prefix(&mut self) -> Result<Prefix> {
        let address = self.read_addr()?;
        let length = self.read_u8()?;
        Ok(Prefix::new(address, length)?)
    }

    fn read_path(&mut self) -> Result<BgpPath> {
        let path_id = self.read_u32()?;
        let next_hop = self.read_addr()?;
        let origin = match self.read_u8()? {
            0 => Origin::Igp,
            1 => Origin::Egp,
            2 => Origin::Incomplete,
            tag => return Err(CodecError::BadOriginTag(tag)),
        };

        let seg_count = self.read_u16()?;
        let mut as_path = Vec::with_capacity(seg_count as usize);
        for _ in 0..seg_count {
            let tag = self.read_u8()?;
            let n = self.read_u16()?;
            let mut asns = Vec::with_capacity(n as usize);
            for _ in 0..n {
                asns.push(self.read_u32()?);
            }
            as_path.push(match tag {
                0 => AsPathSegment::Sequence(asns),
                1 => AsPathSegment::Set(asns),
                tag => return Err(CodecError::BadSegmentTag(tag)),
            });
        }

        let med_present = self.read_bool()?;
        let med_raw = self.read_u32()?;
        let med = med_present.then_some(med_raw);
        let local_pref_present = self.read_bool()?;
        let local_pref_raw = self.read_u32()?;
        let local_pref = local_pref_present.then_some(local_pref_raw);

        let comm_count = self.read_u16()?;
        let mut communities = Vec::with_capacity(comm_count as usize);
        for _ in 0..comm_count {
            communities.push(StandardCommunity {
                high: self.read_u16()?,
                low: self.read_u16()?,
            });
        }

        let ext_count = self.read_u16()?;
        let mut extended_communities = Vec::with_capacity(ext_count as usize);
        for _ in 0..ext_count {
            let raw: [u8; 8] = self.take(8)?.try_into().expect("length checked above");
            extended_communities.push(ExtendedCommunity { raw });
        }

        let large_count = self.read_u16()?;
        let mut large_communities = Vec::with_capacity(large_count as usize);
        for _ in 0..large_count {
            large_communities.push(LargeCommunity {
                global: self.read_u32()?,
                d1: self.read_u32()?,
                d2: self.read_u32()?,
            });
        }

        let aggregator = if self.read_bool()? {
            let asn = self.read_u32()?;
            let address = self.read_addr()?;
            Some(Aggregator { asn, address })
        } else {
            None
        };

        let atomic_aggregate = self.read_bool()?;
        let best = self.read_bool()?;
        let filtered = self.read_bool()?;
        let stale = self.read_bool()?;
        let age = Duration::from_millis(self.read_u64()?);
        let received_at = UNIX_EPOCH + Duration::from_millis(self.read_u64()?);

        Ok(BgpPath {
            path_id,
            next_hop,
            origin,
            as_path,
            med,
            local_pref,
            communities,
            extended_communities,
            large_communities,
            aggregator,
            atomic_aggregate,
            best,
            filtered,
            stale,
            age,
            received_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_path(path_id: u32) -> BgpPath {
        BgpPath {
            path_id,
            next_hop: "10.0.0.1".parse().unwrap(),
            origin: Origin::Igp,
            as_path: vec![
                AsPathSegment::Sequence(vec![65000, 15169]),
                AsPathSegment::Set(vec![64512, 64513]),
            ],
            med: Some(0),
            local_pref: None,
            communities: vec![StandardCommunity { high: 65000, low: 100 }],
            extended_communities: vec![ExtendedCommunity {
                raw: [0, 2, 0xfd, 0xe8, 0, 0, 0, 1],
            }],
            large_communities: vec![LargeCommunity { global: 65000, d1: 1, d2: 2 }],
            aggregator: Some(Aggregator { asn: 65000, address: "10.0.0.1".parse().unwrap() }),
            atomic_aggregate: true,
            best: true,
            filtered: false,
            stale: false,
            age: Duration::from_secs(42),
            received_at: SystemTime::now(),
        }
    }

    #[test]
    fn round_trips_a_full_snapshot() {
        let target = LgTargetId::new("col-1", "sess-1");
        let v4 = Prefix::new("8.8.8.0".parse().unwrap(), 24).unwrap();
        let v6 = Prefix::new("2001:db8::".parse().unwrap(), 32).unwrap();

        let entries = vec![
            RouteEntry { prefix: v4, paths: vec![sample_path(1), sample_path(2)] },
            RouteEntry { prefix: v6, paths: vec![sample_path(3)] },
        ];

        let encoded = encode(
            &[TargetSnapshot { target: target.clone(), entries }],
            SystemTime::now(),
        );

        let decoded = decode(&encoded).expect("decode");
        assert_eq!(decoded.targets.len(), 1);
        let t = &decoded.targets[0];
        assert_eq!(t.target, target);
        assert_eq!(t.entries.len(), 2);
        assert_eq!(t.entries[0].paths.len(), 2);
        assert_eq!(t.entries[0].paths[0].med, Some(0));
        assert_eq!(t.entries[0].paths[0].local_pref, None);
        assert_eq!(t.entries[0].paths[0].aggregator.unwrap().asn, 65000);
        assert_eq!(t.entries[1].prefix, v6);
    }

    #[test]
    fn rejects_unknown_version() {
        let mut bytes = encode(&[], SystemTime::now());
        bytes[0..4].copy_from_slice(&99u32.to_be_bytes());
        let err = decode(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion { found: 99, .. }));
    }

    #[test]
    fn truncated_buffer_is_an_error() {
        let bytes = encode(&[], SystemTime::now());
        let err = decode(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof));
    }
}
