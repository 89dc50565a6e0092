// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Reference collector binary (spec section 4.7). Registers a small fixed
//! set of router sessions with the central server, replays a synthesized
//! Adj-RIB-In for each, then serves diagnostic commands until shut down.
//! A real collector would speak BGP to its own routers instead of
//! hardcoding sessions here; this one exists to exercise the sync protocol
//! and dispatcher end to end.

use anyhow::{Context, Result};
use clap::Parser;
use lookingglass_core::{
    cfg::{cli::{CliArgs, resolve_config_path}, config::Config, logger::init_logger},
    collector::{Collector, SyntheticSession},
};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};

fn demo_sessions() -> Vec<SyntheticSession> {
    vec![
        SyntheticSession {
            session_id: "peer-v4".to_string(),
            display_name: "upstream-v4".to_string(),
            asn: 65001,
            neighbor_address: "192.0.2.1".parse().unwrap(),
            prefixes: vec![
                ("198.51.100.0".parse().unwrap(), 24),
                ("203.0.113.0".parse().unwrap(), 24),
            ],
        },
        SyntheticSession {
            session_id: "peer-v6".to_string(),
            display_name: "upstream-v6".to_string(),
            asn: 65002,
            neighbor_address: "2001:db8::1".parse().unwrap(),
            prefixes: vec![("2001:db8:1::".parse().unwrap(), 48)],
        },
    ]
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    let config_path = resolve_config_path(&args.config)?;
    let cfg = Config::load_from_file(&config_path).context("failed to load config")?;
    let _logger_guard = init_logger(&cfg.logger)?;

    let sessions = demo_sessions();
    let mut collector = Collector::connect(&cfg.collector).await.context("failed to connect")?;
    collector.register(&sessions).await.context("registration failed")?;
    collector.sync_routes(&sessions).await.context("initial sync failed")?;

    info!(collector_id = %cfg.collector.collector_id, "collector ready, serving commands");

    tokio::select! {
        res = collector.serve_commands() => {
            if let Err(e) = res {
                warn!(error = %e, "command service loop exited");
            }
        },
        _ = wait_for_shutdown_signal() => {
            info!("shutdown signal received");
        },
    }

    info!("collector shutting down");
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
