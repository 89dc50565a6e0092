// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Read-only collector/target listing endpoints (spec section 6).

use axum::{
    Json,
    extract::{Path, State},
};

use crate::{
    api::{AppState, error::ApiError},
    model::{Collector, RouterSession},
};

pub async fn list_collectors(State(state): State<AppState>) -> Json<Vec<Collector>> {
    Json(state.registry.list_collectors())
}

pub async fn list_targets(State(state): State<AppState>) -> Json<Vec<RouterSession>> {
    Json(state.registry.list_targets())
}

pub async fn get_target(
    State(state): State<AppState>,
    Path(target_id): Path<String>,
) -> Result<Json<RouterSession>, ApiError> {
    state
        .registry
        .get_target_by_string(&target_id)
        .map(Json)
        .ok_or(ApiError::TargetNotFound(target_id))
}
