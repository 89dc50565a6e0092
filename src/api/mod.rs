// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Lookup/diagnostic HTTP+SSE API (C6, spec section 4.6): thin `axum`
//! handlers delegating to the registry (C3), route store (C1) and
//! dispatcher (C4), plus a liveness endpoint.

pub mod collectors;
pub mod diagnostics;
pub mod error;
pub mod lookup;

use std::{sync::Arc, time::Instant};

use axum::{Json, Router, routing::get};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::{dispatcher::Dispatcher, registry::Registry, store::RouteStore};

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub store: Arc<RouteStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(registry: Arc<Registry>, store: Arc<RouteStore>, dispatcher: Arc<Dispatcher>) -> Self {
        AppState { registry, store, dispatcher, started_at: Instant::now() }
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    status: &'static str,
    uptime_s: u64,
}

async fn health(axum::extract::State(state): axum::extract::State<AppState>) -> Json<HealthBody> {
    Json(HealthBody { status: "ok", uptime_s: state.started_at.elapsed().as_secs() })
}

/// Builds the `/api/v1/*` router plus `/health`, ready to be served with
/// `into_make_service_with_connect_info::<SocketAddr>()` (the diagnostic
/// handlers need the peer address for `client_ip`).
pub fn router(state: AppState) -> Router {
    let api_v1 = Router::new()
        .route("/collectors", get(collectors::list_collectors))
        .route("/targets", get(collectors::list_targets))
        .route("/targets/:id", get(collectors::get_target))
        .route("/targets/:id/routes/lookup", get(lookup::lookup_routes))
        .route("/targets/:id/ping", axum::routing::post(diagnostics::ping))
        .route("/targets/:id/traceroute", axum::routing::post(diagnostics::traceroute));

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", api_v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
