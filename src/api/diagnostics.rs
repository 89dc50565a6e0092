// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Diagnostic contract (spec section 4.6): POST ping/traceroute, validated
//! and audit-logged, dispatched via C4 and relayed to the client as SSE.

use std::{
    convert::Infallible,
    fmt::Write as _,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr},
    time::SystemTime,
};

use axum::{
    Json,
    extract::{ConnectInfo, Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use rand::Rng;
use serde::Deserialize;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tracing::info;

use crate::{
    api::{AppState, error::ApiError},
    dispatcher::CommandEvent,
    model::{CommandParams, CommandStatus, DiagnosticCommand, LgTargetId},
};

fn default_ping_count() -> u32 {
    5
}

fn default_max_hops() -> u8 {
    30
}

fn default_timeout_ms() -> u32 {
    2000
}

fn default_packet_size() -> u32 {
    56
}

#[derive(Debug, Deserialize)]
pub struct PingRequest {
    pub destination: IpAddr,
    #[serde(default = "default_ping_count")]
    pub count: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
    #[serde(default = "default_packet_size")]
    pub packet_size: u32,
}

#[derive(Debug, Deserialize)]
pub struct TracerouteRequest {
    pub destination: IpAddr,
    #[serde(default = "default_max_hops")]
    pub max_hops: u8,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
}

fn generate_command_id() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    let mut hex = String::with_capacity(32);
    for byte in &bytes {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

fn validate_timeout(timeout_ms: u32) -> Result<(), ApiError> {
    if !(1000..=10000).contains(&timeout_ms) {
        return Err(ApiError::ParamOutOfRange {
            field: "timeout_ms",
            detail: format!("{timeout_ms} not in 1000..=10000"),
        });
    }
    Ok(())
}

/// Rejects destinations that aren't plausibly reachable over the public
/// internet: RFC1918, loopback, link-local, multicast, documentation
/// ranges (RFC5737/RFC3849), RFC6598 shared address space, unspecified,
/// and IPv4-mapped IPv6 addresses whose embedded v4 address is itself
/// restricted.
fn validate_destination(addr: IpAddr) -> Result<(), ApiError> {
    let allowed = match addr {
        IpAddr::V4(v4) => v4_allowed(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(mapped) => v4_allowed(mapped),
            None => v6_allowed(v6),
        },
    };
    if allowed {
        Ok(())
    } else {
        Err(ApiError::DestinationNotPermitted(addr.to_string()))
    }
}

fn v4_allowed(a: Ipv4Addr) -> bool {
    if a.is_unspecified() {
        return false;
    }
    let o = a.octets();
    if o[0] == 127 {
        return false; // loopback
    }
    if o[0] == 10 {
        return false; // RFC1918
    }
    if o[0] == 172 && (16..=31).contains(&o[1]) {
        return false; // RFC1918
    }
    if o[0] == 192 && o[1] == 168 {
        return false; // RFC1918
    }
    if o[0] == 169 && o[1] == 254 {
        return false; // link-local
    }
    if o[0] == 100 && (64..=127).contains(&o[1]) {
        return false; // RFC6598 shared address space
    }
    if o[0] >= 224 {
        return false; // multicast, reserved, broadcast
    }
    if o[0] == 192 && o[1] == 0 && o[2] == 2 {
        return false; // documentation, RFC5737
    }
    if o[0] == 198 && o[1] == 51 && o[2] == 100 {
        return false; // documentation
    }
    if o[0] == 203 && o[1] == 0 && o[2] == 113 {
        return false; // documentation
    }
    true
}

fn v6_allowed(a: Ipv6Addr) -> bool {
    if a.is_unspecified() || a.is_loopback() {
        return false;
    }
    let seg = a.segments();
    if seg[0] & 0xffc0 == 0xfe80 {
        return false; // link-local, fe80::/10
    }
    if seg[0] >> 8 == 0xff {
        return false; // multicast, ff00::/8
    }
    if seg[0] == 0x2001 && seg[1] == 0x0db8 {
        return false; // documentation, RFC3849
    }
    true
}

async fn dispatch_command(
    state: &AppState,
    target_id: &str,
    client_ip: IpAddr,
    destination: IpAddr,
    params: CommandParams,
) -> Result<tokio::sync::mpsc::Receiver<CommandEvent>, ApiError> {
    validate_destination(destination)?;
    let target: LgTargetId =
        target_id.parse().map_err(|_| ApiError::TargetNotFound(target_id.to_string()))?;
    state
        .registry
        .get_target(&target)
        .ok_or_else(|| ApiError::TargetNotFound(target_id.to_string()))?;

    let command_id = generate_command_id();
    let command = DiagnosticCommand {
        command_id: command_id.clone(),
        target: target.clone(),
        destination,
        params: params.clone(),
        status: CommandStatus::Pending,
        client_ip,
        created_at: SystemTime::now(),
        completed_at: None,
    };

    info!(
        command_id,
        kind = ?command.kind(),
        %destination,
        collector_id = %target.collector_id,
        session_id = %target.session_id,
        %client_ip,
        "diagnostic command issued"
    );

    Ok(state.dispatcher.dispatch(command)?)
}

fn event_to_sse(event: CommandEvent) -> Event {
    match event {
        CommandEvent::PingReply { seq, rtt_ms, ttl, success } => Event::default()
            .event("reply")
            .json_data(serde_json::json!({
                "seq": seq,
                "rtt_ms": round3(rtt_ms),
                "ttl": ttl,
                "success": success,
            }))
            .unwrap_or_else(|_| Event::default().event("error")),
        CommandEvent::PingSummary {
            packets_sent,
            packets_received,
            loss_pct,
            rtt_min_ms,
            rtt_avg_ms,
            rtt_max_ms,
        } => Event::default()
            .event("summary")
            .json_data(serde_json::json!({
                "packets_sent": packets_sent,
                "packets_received": packets_received,
                "loss_pct": round3(loss_pct),
                "rtt_min_ms": round3(rtt_min_ms),
                "rtt_avg_ms": round3(rtt_avg_ms),
                "rtt_max_ms": round3(rtt_max_ms),
            }))
            .unwrap_or_else(|_| Event::default().event("error")),
        CommandEvent::TracerouteHop { hop_number, address, rtt_ms } => Event::default()
            .event("hop")
            .json_data(serde_json::json!({
                "hop_number": hop_number,
                "address": address.map(|a| a.to_string()),
                "rtt_ms": rtt_ms.into_iter().map(round3).collect::<Vec<_>>(),
            }))
            .unwrap_or_else(|_| Event::default().event("error")),
        CommandEvent::Complete { reached_destination } => Event::default()
            .event("complete")
            .json_data(serde_json::json!({ "reached_destination": reached_destination }))
            .unwrap_or_else(|_| Event::default().event("error")),
        CommandEvent::Error { code, message } => Event::default()
            .event("error")
            .json_data(serde_json::json!({ "code": code, "message": message }))
            .unwrap_or_else(|_| Event::default().event("error")),
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

pub async fn ping(
    State(state): State<AppState>,
    Path(target_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<PingRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    if req.count > 10 {
        return Err(ApiError::ParamOutOfRange {
            field: "count",
            detail: format!("{} exceeds 10", req.count),
        });
    }
    validate_timeout(req.timeout_ms)?;

    let rx = dispatch_command(
        &state,
        &target_id,
        addr.ip(),
        req.destination,
        CommandParams::Ping {
            count: req.count,
            timeout_ms: req.timeout_ms,
            packet_size: req.packet_size,
        },
    )
    .await?;

    let stream = ReceiverStream::new(rx).map(|event| Ok(event_to_sse(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub async fn traceroute(
    State(state): State<AppState>,
    Path(target_id): Path<String>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(req): Json<TracerouteRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let max_allowed = if req.destination.is_ipv4() { 64 } else { 255 };
    if req.max_hops as u32 > max_allowed {
        return Err(ApiError::ParamOutOfRange {
            field: "max_hops",
            detail: format!("{} exceeds {max_allowed}", req.max_hops),
        });
    }
    validate_timeout(req.timeout_ms)?;

    let rx = dispatch_command(
        &state,
        &target_id,
        addr.ip(),
        req.destination,
        CommandParams::Traceroute { max_hops: req.max_hops, timeout_ms: req.timeout_ms },
    )
    .await?;

    let stream = ReceiverStream::new(rx).map(|event| Ok(event_to_sse(event)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_private_v4_destination() {
        assert!(validate_destination("10.1.2.3".parse().unwrap()).is_err());
        assert!(validate_destination("192.168.1.1".parse().unwrap()).is_err());
        assert!(validate_destination("127.0.0.1".parse().unwrap()).is_err());
        assert!(validate_destination("169.254.1.1".parse().unwrap()).is_err());
        assert!(validate_destination("100.64.0.1".parse().unwrap()).is_err());
    }

    #[test]
    fn allows_public_v4_destination() {
        assert!(validate_destination("8.8.8.8".parse().unwrap()).is_ok());
    }

    #[test]
    fn rejects_documentation_and_mapped_restricted_v6() {
        assert!(validate_destination("2001:db8::1".parse().unwrap()).is_err());
        assert!(validate_destination("::ffff:10.0.0.1".parse().unwrap()).is_err());
    }

    #[test]
    fn allows_public_v6_destination() {
        assert!(validate_destination("2606:4700:4700::1111".parse().unwrap()).is_ok());
    }

    #[test]
    fn timeout_bounds_are_enforced() {
        assert!(validate_timeout(999).is_err());
        assert!(validate_timeout(10001).is_err());
        assert!(validate_timeout(2000).is_ok());
    }

    #[test]
    fn command_ids_are_unique_32_char_hex() {
        let a = generate_command_id();
        let b = generate_command_id();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
        assert!(hex::decode(&a).is_ok());
    }
}
