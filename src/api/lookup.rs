// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Route lookup contract (spec section 4.6): resolve a target, parse a
//! prefix or bare address, and execute an exact or longest-prefix-match
//! lookup against the route store, falling back from exact to longest
//! when no explicit match type was requested.

use std::net::IpAddr;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    api::{AppState, error::ApiError},
    model::{BgpPath, CollectorStatus, LgTargetId, Prefix, RouterSession, SessionStatus},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Exact,
    Longest,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub prefix: String,
    pub match_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct LookupMeta {
    pub match_type: MatchType,
    pub data_updated_at: String,
    pub stale: bool,
    pub collector_status: Option<CollectorStatus>,
}

#[derive(Debug, Serialize)]
pub struct LookupResponse {
    pub prefix: String,
    pub target: RouterSession,
    pub paths: Vec<BgpPath>,
    pub plain_text: String,
    pub meta: LookupMeta,
}

pub async fn lookup_routes(
    State(state): State<AppState>,
    Path(target_id): Path<String>,
    Query(query): Query<LookupQuery>,
) -> Result<Json<LookupResponse>, ApiError> {
    let session = state
        .registry
        .get_target_by_string(&target_id)
        .ok_or_else(|| ApiError::TargetNotFound(target_id.clone()))?;
    let target: LgTargetId = target_id
        .parse()
        .map_err(|_| ApiError::TargetNotFound(target_id.clone()))?;

    let prefix = parse_query_prefix(&query.prefix)?;
    let has_mask = query.prefix.contains('/');
    let explicit = query.match_type.is_some();
    let requested = match query.match_type.as_deref() {
        Some("exact") => MatchType::Exact,
        Some("longest") => MatchType::Longest,
        Some(other) => return Err(ApiError::InvalidMatchType(other.to_string())),
        None if has_mask => MatchType::Exact,
        None => MatchType::Longest,
    };

    let (matched_prefix, entry, match_type) = match requested {
        MatchType::Exact => match state.store.lookup_exact(&target, prefix) {
            Some(e) => (prefix, Some(e), MatchType::Exact),
            None if !explicit => match state.store.lookup_lpm(&target, prefix.address) {
                Some(e) => (e.prefix, Some(e), MatchType::Longest),
                None => (prefix, None, MatchType::Exact),
            },
            None => (prefix, None, MatchType::Exact),
        },
        MatchType::Longest => match state.store.lookup_lpm(&target, prefix.address) {
            Some(e) => (e.prefix, Some(e), MatchType::Longest),
            None => (prefix, None, MatchType::Longest),
        },
    };

    let paths = entry.map(|e| e.paths).unwrap_or_default();
    let plain_text = render_plain_text(&matched_prefix, &paths);
    let collector_status = state.registry.get_collector(&session.collector_id).map(|c| c.status);
    let stale = session.status == SessionStatus::Down;

    Ok(Json(LookupResponse {
        prefix: matched_prefix.to_string(),
        target: session,
        paths,
        plain_text,
        meta: LookupMeta {
            match_type,
            data_updated_at: DateTime::<Utc>::from(std::time::SystemTime::now()).to_rfc3339(),
            stale,
            collector_status,
        },
    }))
}

fn parse_query_prefix(s: &str) -> Result<Prefix, ApiError> {
    if let Some((addr, len)) = s.split_once('/') {
        let address: IpAddr = addr.parse().map_err(|_| ApiError::InvalidPrefix(s.to_string()))?;
        let length: u8 = len.parse().map_err(|_| ApiError::InvalidPrefix(s.to_string()))?;
        Prefix::new(address, length).map_err(|e| ApiError::InvalidPrefix(e.to_string()))
    } else {
        let address: IpAddr = s.parse().map_err(|_| ApiError::InvalidPrefix(s.to_string()))?;
        let length = if address.is_ipv4() { 32 } else { 128 };
        Prefix::new(address, length).map_err(|e| ApiError::InvalidPrefix(e.to_string()))
    }
}

fn render_plain_text(prefix: &Prefix, paths: &[BgpPath]) -> String {
    use std::fmt::Write;

    let mut out = format!("BGP routing table entry for {prefix}\n");
    if paths.is_empty() {
        out.push_str("  (no paths)\n");
        return out;
    }
    for path in paths {
        let as_path: Vec<String> = path
            .as_path
            .iter()
            .flat_map(|seg| seg.asns().iter().map(|asn| asn.to_string()))
            .collect();
        let _ = writeln!(
            out,
            "  Path {} via {}{}",
            path.path_id,
            path.next_hop,
            if path.best { " (best)" } else { "" }
        );
        let _ = writeln!(out, "    AS path: {}", as_path.join(" "));
        let _ = writeln!(
            out,
            "    origin: {:?}, med: {}, local_pref: {}",
            path.origin,
            path.med.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
            path.local_pref.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string()),
        );
        if !path.communities.is_empty() {
            let c: Vec<String> = path.communities.iter().map(|c| c.to_string()).collect();
            let _ = writeln!(out, "    communities: {}", c.join(" "));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_prefix_with_mask() {
        let p = parse_query_prefix("10.0.0.0/24").unwrap();
        assert_eq!(p.length, 24);
    }

    #[test]
    fn parses_bare_address_as_host_prefix() {
        let p = parse_query_prefix("10.0.0.1").unwrap();
        assert_eq!(p.length, 32);
        assert_eq!(p.address, "10.0.0.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn rejects_garbage_prefix() {
        assert!(parse_query_prefix("not-an-ip").is_err());
    }

    #[test]
    fn plain_text_renders_no_paths_placeholder() {
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 24).unwrap();
        let text = render_plain_text(&prefix, &[]);
        assert!(text.contains("no paths"));
    }
}
