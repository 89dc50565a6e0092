// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Sync protocol handler (C5, spec section 4.5): the long-lived
//! bidirectional stream that applies `begin_snapshot` / `route_update` /
//! `end_snapshot` frames into the route store and keeps the registry in
//! sync, plus the command subscription and result-reporting RPCs (C4's
//! collector-facing half).
//!
//! The begin/route-update/end-snapshot ordering invariant (spec section 5)
//! falls out for free: `tonic` delivers one stream's frames in order, and
//! each collector connection is processed by a single task, so no separate
//! reordering buffer is needed.

pub(crate) mod convert;
mod identity;

use std::{net::IpAddr, pin::Pin, sync::Arc, time::Instant};

use tokio::sync::mpsc;
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tonic::{Request, Response, Status, Streaming};
use tracing::{info, warn};

use crate::{
    dispatcher::{CommandEvent, Dispatcher},
    model::{CommandParams, DiagnosticCommand, LgTargetId, RouterSession, SessionStatus},
    proto::lookingglass::{
        self, CommandAck, CommandResultChunk, DiagnosticCommandMsg, RegisterRequest,
        RegisterResponse, RouteMessage, SubscribeRequest, SyncControl,
        central_server::Central, command_result_chunk, diagnostic_command_msg, route_message,
        sync_control,
    },
    registry::Registry,
    store::RouteStore,
};

pub struct CentralService {
    registry: Arc<Registry>,
    store: Arc<RouteStore>,
    dispatcher: Arc<Dispatcher>,
    mtls_enabled: bool,
}

impl CentralService {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<RouteStore>,
        dispatcher: Arc<Dispatcher>,
        mtls_enabled: bool,
    ) -> Self {
        CentralService { registry, store, dispatcher, mtls_enabled }
    }

    fn resolve_collector_id<T>(&self, req: &Request<T>, declared: &str) -> Result<String, Status> {
        identity::resolve_collector_id(req, declared, self.mtls_enabled)
    }
}

type ResultStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

#[tonic::async_trait]
impl Central for CentralService {
    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<RegisterResponse>, Status> {
        let declared = request.get_ref().collector_id.clone();
        let collector_id = self.resolve_collector_id(&request, &declared)?;
        let req = request.into_inner();

        let sessions = req
            .router_sessions
            .into_iter()
            .map(|s| {
                let address_families = s
                    .address_families
                    .into_iter()
                    .filter_map(convert::decode_address_family)
                    .collect();
                let neighbor_address: IpAddr = convert::decode_address(
                    if s.neighbor_address.len() == 16 { 6 } else { 4 },
                    &s.neighbor_address,
                )
                .map_err(|e| Status::invalid_argument(format!("bad neighbor address: {e}")))?;
                Ok(RouterSession {
                    collector_id: collector_id.clone(),
                    session_id: s.session_id,
                    display_name: s.display_name,
                    asn: s.asn,
                    neighbor_address,
                    status: SessionStatus::Pending,
                    last_update: std::time::SystemTime::now(),
                    route_count: 0,
                    address_families,
                })
            })
            .collect::<Result<Vec<_>, Status>>()?;

        self.registry.register_collector(&collector_id, &req.location, sessions);
        self.dispatcher.register_collector(&collector_id);

        info!(collector_id, location = %req.location, "collector registered");
        Ok(Response::new(RegisterResponse {
            accepted: true,
            message: "registered".to_string(),
        }))
    }

    type SyncRoutesStream = ResultStream<SyncControl>;

    async fn sync_routes(
        &self,
        request: Request<Streaming<RouteMessage>>,
    ) -> Result<Response<Self::SyncRoutesStream>, Status> {
        // In mTLS mode the CN is stable for the whole connection; in dev
        // mode identity is inferred per message below, from the session id.
        let mtls_collector_id = if self.mtls_enabled {
            Some(self.resolve_collector_id(&request, "")?)
        } else {
            None
        };
        let mut inbound = request.into_inner();
        let store = self.store.clone();
        let registry = self.registry.clone();
        let (tx, rx) = mpsc::channel(16);

        tokio::spawn(async move {
            let mut started_at: Option<Instant> = None;
            let mut seen_collectors: Vec<String> = Vec::new();
            while let Some(msg) = inbound.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "sync stream error, tearing down session state");
                        break;
                    },
                };

                let session_id = match &msg.msg {
                    Some(route_message::Msg::BeginSnapshot(b)) => &b.router_session_id,
                    Some(route_message::Msg::RouteUpdate(u)) => &u.router_session_id,
                    Some(route_message::Msg::EndSnapshot(e)) => &e.router_session_id,
                    None => continue,
                };
                let collector_id = match &mtls_collector_id {
                    Some(id) => id.clone(),
                    None => match identity::infer_dev_mode_collector_id(&registry, session_id) {
                        Some(id) => id,
                        None => {
                            warn!(session_id, "ambiguous or unknown dev-mode collector identity, dropping message");
                            continue;
                        },
                    },
                };
                if !seen_collectors.contains(&collector_id) {
                    seen_collectors.push(collector_id.clone());
                }

                match msg.msg {
                    Some(route_message::Msg::BeginSnapshot(begin)) => {
                        let target = LgTargetId::new(collector_id.clone(), begin.router_session_id.clone());
                        store.create_trie(&target);
                        registry.update_session_status(&target, SessionStatus::Established);
                        started_at = Some(Instant::now());
                    },
                    Some(route_message::Msg::RouteUpdate(update)) => {
                        let target =
                            LgTargetId::new(collector_id.clone(), update.router_session_id.clone());
                        for route in &update.routes {
                            let prefix = match convert::decode_prefix(route) {
                                Ok(p) => p,
                                Err(e) => {
                                    warn!(collector_id, error = %e, "invalid prefix, skipping route");
                                    continue;
                                },
                            };
                            if update.action == lookingglass::RouteAction::Withdraw as i32 {
                                store.withdraw_route(&target, prefix, route.path_id);
                                continue;
                            }
                            match convert::decode_path(route) {
                                Ok(path) => store.upsert_route(&target, prefix, path),
                                Err(e) => {
                                    warn!(collector_id, error = %e, "invalid path, skipping route");
                                },
                            }
                        }
                        registry.update_session_last_update(&target);
                    },
                    Some(route_message::Msg::EndSnapshot(end)) => {
                        let target =
                            LgTargetId::new(collector_id.clone(), end.router_session_id.clone());
                        let actual = store.count(&target) as u64;
                        info!(
                            collector_id,
                            session_id = %end.router_session_id,
                            reported = end.route_count,
                            actual,
                            elapsed_ms = started_at.map(|s| s.elapsed().as_millis()).unwrap_or(0),
                            "end snapshot"
                        );
                        registry.update_session_status(&target, SessionStatus::Active);
                        registry.update_session_route_count(&target, actual);
                        if tx
                            .send(Ok(SyncControl {
                                msg: Some(sync_control::Msg::SnapshotAck(
                                    lookingglass::SnapshotAck {
                                        router_session_id: end.router_session_id,
                                        routes_received: actual,
                                    },
                                )),
                            }))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    },
                    None => {},
                }
            }

            // A stream that errors or closes only tears down the sync state
            // for that collector's sessions; the tries themselves are left
            // in place so operators still see last-known routes, flagged
            // stale through the session status.
            for collector_id in seen_collectors {
                for session_id in registry
                    .get_collector(&collector_id)
                    .map(|c| c.session_ids)
                    .unwrap_or_default()
                {
                    registry.update_session_status(
                        &LgTargetId::new(collector_id.clone(), session_id),
                        SessionStatus::Down,
                    );
                }
            }
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx))))
    }

    type SubscribeCommandsStream = ResultStream<DiagnosticCommandMsg>;

    async fn subscribe_commands(
        &self,
        request: Request<SubscribeRequest>,
    ) -> Result<Response<Self::SubscribeCommandsStream>, Status> {
        let collector_id = self.resolve_collector_id(&request, &request.get_ref().collector_id)?;
        self.dispatcher.register_collector(&collector_id);
        let rx = self.dispatcher.get_command_channel(&collector_id).ok_or_else(|| {
            Status::already_exists("command stream already subscribed for this collector")
        })?;

        let stream = ReceiverStream::new(rx).map(|cmd| Ok(command_to_wire(cmd)));
        Ok(Response::new(Box::pin(stream)))
    }

    async fn report_command_result(
        &self,
        request: Request<Streaming<CommandResultChunk>>,
    ) -> Result<Response<CommandAck>, Status> {
        let mut inbound = request.into_inner();
        while let Some(chunk) = inbound.next().await {
            let chunk = chunk?;
            if let Some(event) = chunk_to_event(chunk.result) {
                self.dispatcher.report_result(&chunk.command_id, event);
            }
        }
        Ok(Response::new(CommandAck { accepted: true }))
    }
}

fn command_to_wire(cmd: DiagnosticCommand) -> DiagnosticCommandMsg {
    let (_, destination) = convert::encode_address(cmd.destination);
    let params = match cmd.params {
        CommandParams::Ping { count, timeout_ms, packet_size } => {
            diagnostic_command_msg::Params::Ping(lookingglass::PingParams {
                count,
                timeout_ms,
                packet_size,
            })
        },
        CommandParams::Traceroute { max_hops, timeout_ms } => {
            diagnostic_command_msg::Params::Traceroute(lookingglass::TracerouteParams {
                max_hops: max_hops as u32,
                timeout_ms,
                packet_size: 0,
            })
        },
    };
    DiagnosticCommandMsg {
        command_id: cmd.command_id,
        router_session_id: cmd.target.session_id,
        destination,
        params: Some(params),
    }
}

fn chunk_to_event(result: Option<command_result_chunk::Result>) -> Option<CommandEvent> {
    match result? {
        command_result_chunk::Result::PingResult(r) => Some(CommandEvent::PingReply {
            seq: r.seq,
            rtt_ms: r.rtt_micros as f64 / 1000.0,
            ttl: r.ttl as u8,
            success: r.success,
        }),
        command_result_chunk::Result::TracerouteHop(h) => {
            let address = convert::decode_address(
                if h.address.len() == 16 { 6 } else { 4 },
                &h.address,
            )
            .ok();
            Some(CommandEvent::TracerouteHop {
                hop_number: h.hop_number,
                address,
                rtt_ms: h.rtt_micros.into_iter().map(|us| us as f64 / 1000.0).collect(),
            })
        },
        command_result_chunk::Result::Complete(c) => Some(CommandEvent::Complete {
            reached_destination: c.reached_destination_known.then_some(c.reached_destination),
        }),
        command_result_chunk::Result::Error(e) => {
            Some(CommandEvent::Error { code: e.code, message: e.message })
        },
        command_result_chunk::Result::PingSummary(s) => Some(CommandEvent::PingSummary {
            packets_sent: s.packets_sent,
            packets_received: s.packets_received,
            loss_pct: s.loss_pct,
            rtt_min_ms: s.rtt_min_ms,
            rtt_avg_ms: s.rtt_avg_ms,
            rtt_max_ms: s.rtt_max_ms,
        }),
    }
}
