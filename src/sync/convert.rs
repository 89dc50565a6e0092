// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Translation between wire messages (`proto::lookingglass`) and the core
//! data model.

use std::{
    net::{IpAddr, Ipv4Addr, Ipv6Addr},
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result, bail};

use crate::{
    model::{
        Aggregator, AddressFamilyPair, AsPathSegment, BgpPath, ExtendedCommunity,
        LargeCommunity, Origin, Prefix, StandardCommunity,
    },
    proto::lookingglass,
};

pub fn decode_address(family: u32, bytes: &[u8]) -> Result<IpAddr> {
    match (family, bytes.len()) {
        (4, 4) => Ok(IpAddr::V4(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))),
        (6, 16) => {
            let arr: [u8; 16] = bytes.try_into().context("ipv6 address must be 16 bytes")?;
            Ok(IpAddr::V6(Ipv6Addr::from(arr)))
        },
        (f, n) => bail!("unsupported address family {f} with {n} bytes"),
    }
}

pub fn encode_address(addr: IpAddr) -> (u32, Vec<u8>) {
    match addr {
        IpAddr::V4(v4) => (4, v4.octets().to_vec()),
        IpAddr::V6(v6) => (6, v6.octets().to_vec()),
    }
}

pub fn decode_prefix(route: &lookingglass::WireRoute) -> Result<Prefix> {
    let addr = decode_address(route.family, &route.prefix)?;
    Ok(Prefix::new(addr, route.mask_len as u8)?)
}

pub fn decode_path(route: &lookingglass::WireRoute) -> Result<BgpPath> {
    let attrs = route
        .attrs
        .as_ref()
        .context("route update missing bgp attributes")?;

    let next_hop = decode_address(route.family, &attrs.next_hop)?;
    let origin = match attrs.origin {
        0 => Origin::Igp,
        1 => Origin::Egp,
        2 => Origin::Incomplete,
        other => bail!("unknown origin code {other}"),
    };

    let as_path = attrs
        .as_path
        .iter()
        .map(|seg| match seg.kind {
            0 => Ok(AsPathSegment::Sequence(seg.asns.clone())),
            1 => Ok(AsPathSegment::Set(seg.asns.clone())),
            other => bail!("unknown as-path segment kind {other}"),
        })
        .collect::<Result<Vec<_>>>()?;

    let communities = attrs
        .communities
        .iter()
        .map(|raw| StandardCommunity { high: (raw >> 16) as u16, low: (*raw & 0xffff) as u16 })
        .collect();

    let extended_communities = attrs
        .extended_communities
        .iter()
        .map(|raw| -> Result<ExtendedCommunity> {
            let arr: [u8; 8] = raw.as_slice().try_into().context("extended community must be 8 bytes")?;
            Ok(ExtendedCommunity { raw: arr })
        })
        .collect::<Result<Vec<_>>>()?;

    let large_communities = attrs
        .large_communities
        .iter()
        .map(|c| LargeCommunity { global: c.global, d1: c.local1, d2: c.local2 })
        .collect();

    let aggregator = if attrs.has_aggregator {
        Some(Aggregator {
            asn: attrs.aggregator_asn,
            address: decode_address(route.family, &attrs.aggregator_address)?,
        })
    } else {
        None
    };

    Ok(BgpPath {
        path_id: route.path_id,
        next_hop,
        origin,
        as_path,
        med: attrs.med_present.then_some(attrs.med),
        local_pref: attrs.local_pref_present.then_some(attrs.local_pref),
        communities,
        extended_communities,
        large_communities,
        aggregator,
        atomic_aggregate: attrs.atomic_aggregate,
        best: route.best,
        filtered: attrs.filtered,
        stale: attrs.stale,
        age: Duration::from_secs(attrs.age_secs as u64),
        received_at: SystemTime::now(),
    })
}

pub fn decode_address_family(tag: i32) -> Option<AddressFamilyPair> {
    match lookingglass::AddressFamily::try_from(tag).ok()? {
        lookingglass::AddressFamily::Ipv4Unicast => Some(AddressFamilyPair::Ipv4Unicast),
        lookingglass::AddressFamily::Ipv6Unicast => Some(AddressFamilyPair::Ipv6Unicast),
        lookingglass::AddressFamily::AddressFamilyUnspecified => None,
    }
}

pub fn encode_address_family(af: AddressFamilyPair) -> i32 {
    match af {
        AddressFamilyPair::Ipv4Unicast => lookingglass::AddressFamily::Ipv4Unicast as i32,
        AddressFamilyPair::Ipv6Unicast => lookingglass::AddressFamily::Ipv6Unicast as i32,
    }
}

pub fn encode_bgp_path(prefix: &Prefix, path: &BgpPath) -> lookingglass::WireRoute {
    let (family, prefix_bytes) = encode_address(prefix.address);
    let (_, next_hop_bytes) = encode_address(path.next_hop);

    let as_path = path
        .as_path
        .iter()
        .map(|seg| match seg {
            AsPathSegment::Sequence(v) => {
                lookingglass::AsPathSegmentMsg { kind: 0, asns: v.clone() }
            },
            AsPathSegment::Set(v) => lookingglass::AsPathSegmentMsg { kind: 1, asns: v.clone() },
        })
        .collect();

    let communities = path
        .communities
        .iter()
        .map(|c| ((c.high as u32) << 16) | c.low as u32)
        .collect();

    let extended_communities = path.extended_communities.iter().map(|c| c.raw.to_vec()).collect();

    let large_communities = path
        .large_communities
        .iter()
        .map(|c| lookingglass::LargeCommunityMsg { global: c.global, local1: c.d1, local2: c.d2 })
        .collect();

    let (aggregator_asn, aggregator_address, has_aggregator) = match path.aggregator {
        Some(agg) => {
            let (_, bytes) = encode_address(agg.address);
            (agg.asn, bytes, true)
        },
        None => (0, Vec::new(), false),
    };

    lookingglass::WireRoute {
        family,
        prefix: prefix_bytes,
        mask_len: prefix.length as u32,
        path_id: path.path_id,
        best: path.best,
        attrs: Some(lookingglass::BgpAttributes {
            next_hop: next_hop_bytes,
            origin: match path.origin {
                Origin::Igp => 0,
                Origin::Egp => 1,
                Origin::Incomplete => 2,
            },
            med: path.med.unwrap_or(0),
            med_present: path.med.is_some(),
            local_pref: path.local_pref.unwrap_or(0),
            local_pref_present: path.local_pref.is_some(),
            as_path,
            communities,
            extended_communities,
            large_communities,
            has_aggregator,
            aggregator_asn,
            aggregator_address,
            atomic_aggregate: path.atomic_aggregate,
            filtered: path.filtered,
            stale: path.stale,
            age_secs: path.age.as_secs() as u32,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_address_round_trips_v4() {
        let (family, bytes) = encode_address("10.0.0.1".parse().unwrap());
        let back = decode_address(family, &bytes).unwrap();
        assert_eq!(back, "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn decode_address_round_trips_v6() {
        let (family, bytes) = encode_address("2001:db8::1".parse().unwrap());
        let back = decode_address(family, &bytes).unwrap();
        assert_eq!(back, "2001:db8::1".parse::<IpAddr>().unwrap());
    }
}
