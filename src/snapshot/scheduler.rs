// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{path::PathBuf, sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{snapshot::save_best_effort, store::RouteStore};

/// Drives periodic snapshot saves until `cancel` fires, then performs one
/// final save before returning (spec section 4.2/5).
pub async fn run_periodic_snapshots(
    store: Arc<RouteStore>,
    path: PathBuf,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; skip it, state is empty

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                save_best_effort(&store, &path);
            },
            _ = cancel.cancelled() => {
                info!("snapshot scheduler shutting down, writing final snapshot");
                save_best_effort(&store, &path);
                return;
            },
        }
    }
}
