// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Reference collector: connects to the central server, registers, replays
//! a small synthesized Adj-RIB-In, and serves diagnostic commands against
//! it by shelling out to the system `ping`/`traceroute` binaries (spec
//! section 4.7). Exists to give the sync protocol and dispatcher something
//! real to talk to end to end; it does not speak real BGP.

use std::{
    net::IpAddr,
    time::{Duration, SystemTime},
};

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tonic::transport::Channel;
use tracing::{info, warn};

use crate::{
    cfg::config::CollectorConfig,
    model::{AsPathSegment, BgpPath, Origin, Prefix},
    proto::lookingglass::{
        self, BeginSnapshot, CommandResultChunk, EndSnapshot, RegisterRequest, RouteMessage,
        RouteUpdate, RouterSessionInfo, SubscribeRequest, WireRoute,
        central_client::CentralClient, diagnostic_command_msg, route_message,
    },
    sync::convert,
};

pub(crate) fn encode_addr(addr: IpAddr) -> Vec<u8> {
    convert::encode_address(addr).1
}

pub(crate) fn decode_addr(bytes: &[u8]) -> Result<IpAddr> {
    let family = if bytes.len() == 16 { 6 } else { 4 };
    convert::decode_address(family, bytes)
}

fn family_tag(addr: IpAddr) -> i32 {
    if addr.is_ipv4() {
        lookingglass::AddressFamily::Ipv4Unicast as i32
    } else {
        lookingglass::AddressFamily::Ipv6Unicast as i32
    }
}

/// One router session and the small fixed Adj-RIB-In synthesized for it.
pub struct SyntheticSession {
    pub session_id: String,
    pub display_name: String,
    pub asn: u32,
    pub neighbor_address: IpAddr,
    pub prefixes: Vec<(IpAddr, u8)>,
}

fn synth_route(addr: IpAddr, len: u8, asn: u32, next_hop: IpAddr) -> Result<WireRoute> {
    let prefix = Prefix::new(addr, len).context("invalid synthesized prefix")?;
    let path = BgpPath {
        path_id: 1,
        next_hop,
        origin: Origin::Igp,
        as_path: vec![AsPathSegment::Sequence(vec![asn])],
        med: None,
        local_pref: Some(100),
        communities: vec![],
        extended_communities: vec![],
        large_communities: vec![],
        aggregator: None,
        atomic_aggregate: false,
        best: true,
        filtered: false,
        stale: false,
        age: Duration::ZERO,
        received_at: SystemTime::now(),
    };
    Ok(convert::encode_bgp_path(&prefix, &path))
}

pub struct Collector {
    client: CentralClient<Channel>,
    collector_id: String,
    location: String,
}

impl Collector {
    pub async fn connect(cfg: &CollectorConfig) -> Result<Self> {
        let client = CentralClient::connect(cfg.central_addr.clone())
            .await
            .context("failed to connect to central server")?;
        Ok(Collector { client, collector_id: cfg.collector_id.clone(), location: cfg.location.clone() })
    }

    pub async fn register(&mut self, sessions: &[SyntheticSession]) -> Result<()> {
        let router_sessions = sessions
            .iter()
            .map(|s| RouterSessionInfo {
                session_id: s.session_id.clone(),
                display_name: s.display_name.clone(),
                asn: s.asn,
                neighbor_address: encode_addr(s.neighbor_address),
                address_families: vec![family_tag(s.neighbor_address)],
            })
            .collect();

        let response = self
            .client
            .register(RegisterRequest {
                collector_id: self.collector_id.clone(),
                location: self.location.clone(),
                router_sessions,
            })
            .await
            .context("register RPC failed")?
            .into_inner();

        if !response.accepted {
            anyhow::bail!("registration rejected: {}", response.message);
        }
        info!(collector_id = %self.collector_id, "registered with central server");
        Ok(())
    }

    /// Opens the sync stream, replays each session's synthesized
    /// Adj-RIB-In as a single begin/update/end sequence, then drains
    /// acknowledgements until the server closes its half.
    pub async fn sync_routes(&mut self, sessions: &[SyntheticSession]) -> Result<()> {
        let (tx, rx) = mpsc::channel(16);
        for session in sessions {
            let _ = tx
                .send(RouteMessage {
                    msg: Some(route_message::Msg::BeginSnapshot(BeginSnapshot {
                        router_session_id: session.session_id.clone(),
                    })),
                })
                .await;

            let routes = session
                .prefixes
                .iter()
                .map(|(addr, len)| synth_route(*addr, *len, session.asn, session.neighbor_address))
                .collect::<Result<Vec<_>>>()?;
            let _ = tx
                .send(RouteMessage {
                    msg: Some(route_message::Msg::RouteUpdate(RouteUpdate {
                        router_session_id: session.session_id.clone(),
                        action: lookingglass::RouteAction::Add as i32,
                        routes,
                    })),
                })
                .await;

            let _ = tx
                .send(RouteMessage {
                    msg: Some(route_message::Msg::EndSnapshot(EndSnapshot {
                        router_session_id: session.session_id.clone(),
                        route_count: session.prefixes.len() as u64,
                    })),
                })
                .await;
        }
        drop(tx);

        let mut inbound = self
            .client
            .sync_routes(ReceiverStream::new(rx))
            .await
            .context("sync_routes RPC failed")?
            .into_inner();
        while let Some(ctrl) = inbound.next().await {
            match ctrl {
                Ok(c) => info!(control = ?c.msg, "received sync control frame"),
                Err(e) => {
                    warn!(error = %e, "sync stream error");
                    break;
                },
            }
        }
        Ok(())
    }

    /// Subscribes to commands and serves each with the system ping/
    /// traceroute binaries, reporting results back on a single long-lived
    /// `ReportCommandResult` stream.
    pub async fn serve_commands(&mut self) -> Result<()> {
        let mut commands = self
            .client
            .subscribe_commands(SubscribeRequest { collector_id: self.collector_id.clone() })
            .await
            .context("subscribe_commands RPC failed")?
            .into_inner();

        let (tx, rx) = mpsc::channel::<CommandResultChunk>(32);
        let mut report_client = self.client.clone();
        let reporter = tokio::spawn(async move {
            if let Err(e) = report_client.report_command_result(ReceiverStream::new(rx)).await {
                warn!(error = %e, "report_command_result RPC failed");
            }
        });

        while let Some(cmd) = commands.next().await {
            let cmd = match cmd {
                Ok(c) => c,
                Err(e) => {
                    warn!(error = %e, "subscribe_commands stream error");
                    break;
                },
            };
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_one(cmd, tx).await {
                    warn!(error = %e, "failed to serve diagnostic command");
                }
            });
        }

        drop(tx);
        let _ = reporter.await;
        Ok(())
    }
}

async fn serve_one(
    cmd: lookingglass::DiagnosticCommandMsg,
    tx: mpsc::Sender<CommandResultChunk>,
) -> Result<()> {
    let destination = decode_addr(&cmd.destination)?;
    let chunks = match cmd.params {
        Some(diagnostic_command_msg::Params::Ping(p)) => {
            super::probe::run_ping(&cmd.command_id, destination, p.count, p.timeout_ms).await?
        },
        Some(diagnostic_command_msg::Params::Traceroute(p)) => {
            super::probe::run_traceroute(&cmd.command_id, destination, p.max_hops, p.timeout_ms)
                .await?
        },
        None => return Ok(()),
    };
    for chunk in chunks {
        if tx.send(chunk).await.is_err() {
            break;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synth_route_carries_asn_and_next_hop() {
        let route = synth_route(
            "10.0.0.0".parse().unwrap(),
            24,
            65001,
            "192.0.2.1".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(route.family, 4);
        assert_eq!(route.mask_len, 24);
        let attrs = route.attrs.unwrap();
        assert_eq!(attrs.as_path[0].asns, vec![65001]);
        assert_eq!(decode_addr(&attrs.next_hop).unwrap(), "192.0.2.1".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn encode_decode_addr_round_trips() {
        let addr: IpAddr = "198.51.100.7".parse().unwrap();
        assert_eq!(decode_addr(&encode_addr(addr)).unwrap(), addr);
    }
}
