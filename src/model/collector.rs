// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, net::IpAddr, str::FromStr, time::SystemTime};

use serde::{Deserialize, Serialize};

/// Lifecycle status of a [`Collector`] (spec section 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorStatus {
    Connecting,
    Connected,
    Syncing,
    Active,
    Disconnected,
}

/// Lifecycle status of a [`RouterSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Established,
    Active,
    Down,
}

/// An AFI/SAFI pair a session has negotiated support for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressFamilyPair {
    Ipv4Unicast,
    Ipv6Unicast,
}

/// A collector process: identity, location, lifecycle status and the set of
/// router sessions it owns (spec section 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collector {
    pub id: String,
    pub location: String,
    pub status: CollectorStatus,
    pub connected_at: SystemTime,
    pub disconnected_at: Option<SystemTime>,
    /// Session ids owned by this collector. Full session details are looked
    /// up through the registry's flat `LGTargetID -> RouterSession` index.
    pub session_ids: Vec<String>,
}

/// The operator-addressable identifier of a BGP peer session: the pair
/// `(collector_id, session_id)`, rendered `"collector_id:session_id"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LgTargetId {
    pub collector_id: String,
    pub session_id: String,
}

impl LgTargetId {
    pub fn new(collector_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        LgTargetId {
            collector_id: collector_id.into(),
            session_id: session_id.into(),
        }
    }
}

impl fmt::Display for LgTargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.collector_id, self.session_id)
    }
}

/// Error returned when a string does not parse as `"collector_id:session_id"`.
#[derive(Debug, thiserror::Error)]
#[error("invalid target id {0:?}: expected \"collector_id:session_id\"")]
pub struct ParseLgTargetIdError(String);

impl FromStr for LgTargetId {
    type Err = ParseLgTargetIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (collector_id, session_id) = s
            .split_once(':')
            .ok_or_else(|| ParseLgTargetIdError(s.to_string()))?;
        if collector_id.is_empty() || session_id.is_empty() {
            return Err(ParseLgTargetIdError(s.to_string()));
        }
        Ok(LgTargetId::new(collector_id, session_id))
    }
}

/// The per-peer session on a [`Collector`] (spec section 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSession {
    pub collector_id: String,
    pub session_id: String,
    pub display_name: String,
    pub asn: u32,
    pub neighbor_address: IpAddr,
    pub status: SessionStatus,
    pub last_update: SystemTime,
    pub route_count: u64,
    pub address_families: Vec<AddressFamilyPair>,
}

impl RouterSession {
    pub fn target_id(&self) -> LgTargetId {
        LgTargetId::new(self.collector_id.clone(), self.session_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_id_round_trips_through_display_and_parse() {
        let id = LgTargetId::new("col-1", "sess-1");
        let rendered = id.to_string();
        assert_eq!(rendered, "col-1:sess-1");
        let parsed: LgTargetId = rendered.parse().expect("parse");
        assert_eq!(parsed, id);
    }

    #[test]
    fn target_id_rejects_missing_colon() {
        assert!("no-colon-here".parse::<LgTargetId>().is_err());
    }
}
