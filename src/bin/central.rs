// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use lookingglass_core::{
    api::{self, AppState},
    cfg::{cli::{CliArgs, resolve_config_path}, config::Config, logger::init_logger},
    dispatcher::Dispatcher,
    proto::lookingglass::central_server::CentralServer,
    registry::Registry,
    snapshot,
    store::RouteStore,
    sync::CentralService,
};
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config_path = resolve_config_path(&args.config)?;
    let cfg = Config::load_from_file(&config_path).context("failed to load config")?;
    let _logger_guard = init_logger(&cfg.logger)?;

    let registry = Arc::new(Registry::new());
    let store = Arc::new(RouteStore::new());
    let dispatcher = Arc::new(Dispatcher::new(cfg.dispatcher.max_per_target));

    let snapshot_path = std::path::PathBuf::from(&cfg.snapshot.path);
    snapshot::load(&store, &snapshot_path).context("failed to load snapshot")?;
    info!(path = ?snapshot_path, "snapshot loaded");

    let cancel = CancellationToken::new();

    let scheduler = tokio::spawn(snapshot::run_periodic_snapshots(
        store.clone(),
        snapshot_path.clone(),
        cfg.snapshot.interval,
        cancel.clone(),
    ));

    let grpc_addr: SocketAddr =
        cfg.central.grpc_listen_addr.parse().context("invalid grpc_listen_addr")?;
    let http_addr: SocketAddr =
        cfg.central.http_listen_addr.parse().context("invalid http_listen_addr")?;

    let central_service =
        CentralService::new(registry.clone(), store.clone(), dispatcher.clone(), cfg.tls.mtls_enabled);

    let mut server_builder = Server::builder();
    if cfg.tls.mtls_enabled {
        let cert = std::fs::read(cfg.tls.cert_path.as_deref().context("tls.cert_path required")?)?;
        let key = std::fs::read(cfg.tls.key_path.as_deref().context("tls.key_path required")?)?;
        let ca = std::fs::read(cfg.tls.ca_path.as_deref().context("tls.ca_path required")?)?;
        let tls_config = ServerTlsConfig::new()
            .identity(Identity::from_pem(cert, key))
            .client_ca_root(tonic::transport::Certificate::from_pem(ca))
            .client_auth_optional(false);
        server_builder = server_builder
            .tls_config(tls_config)
            .context("failed to configure mTLS")?;
    }

    let grpc_cancel = cancel.clone();
    let grpc_server = tokio::spawn(async move {
        server_builder
            .add_service(CentralServer::new(central_service))
            .serve_with_shutdown(grpc_addr, grpc_cancel.cancelled_owned())
            .await
    });

    let app_state = AppState::new(registry.clone(), store.clone(), dispatcher.clone());
    let router = api::router(app_state);
    let listener = tokio::net::TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {http_addr}"))?;
    let http_cancel = cancel.clone();
    let http_server = tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(http_cancel.cancelled_owned())
            .await
    });

    info!(%grpc_addr, %http_addr, "central server listening");

    wait_for_shutdown_signal().await?;
    info!("shutdown signal received, draining");
    cancel.cancel();

    let shutdown_budget = cfg.central.shutdown_timeout;
    if tokio::time::timeout(shutdown_budget, async {
        let _ = grpc_server.await;
        let _ = http_server.await;
        let _ = scheduler.await;
    })
    .await
    .is_err()
    {
        warn!(budget_s = shutdown_budget.as_secs(), "graceful shutdown budget expired, forcing exit");
        std::process::exit(1);
    }

    snapshot::save_best_effort(&store, &snapshot_path);
    info!("shutdown complete");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigterm.recv() => {},
    }
    Ok(())
}
