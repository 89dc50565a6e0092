// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenarios 1 and 2 (spec section 8) driven through the real HTTP router,
//! not just the store directly: exact match and longest-prefix-match
//! fallback, end to end from a request to a JSON body.

use std::{sync::Arc, time::SystemTime};

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use lookingglass_core::{
    api::{self, AppState},
    dispatcher::Dispatcher,
    model::{AddressFamilyPair, BgpPath, LgTargetId, Origin, Prefix, RouterSession, SessionStatus},
    registry::Registry,
    store::RouteStore,
};
use tower::ServiceExt;

fn sample_path(next_hop: &str) -> BgpPath {
    BgpPath {
        path_id: 1,
        next_hop: next_hop.parse().unwrap(),
        origin: Origin::Igp,
        as_path: vec![lookingglass_core::model::AsPathSegment::Sequence(vec![65000, 15169])],
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
        age: std::time::Duration::from_secs(1),
        received_at: SystemTime::now(),
    }
}

fn build_app() -> (axum::Router, LgTargetId) {
    let registry = Arc::new(Registry::new());
    let store = Arc::new(RouteStore::new());
    let dispatcher = Arc::new(Dispatcher::new(2));

    let target = LgTargetId::new("col-1", "sess-1");
    registry.register_collector("col-1", "test-loc", vec![RouterSession {
        collector_id: "col-1".to_string(),
        session_id: "sess-1".to_string(),
        display_name: "test session".to_string(),
        asn: 65000,
        neighbor_address: "192.0.2.1".parse().unwrap(),
        status: SessionStatus::Active,
        last_update: SystemTime::now(),
        route_count: 0,
        address_families: vec![AddressFamilyPair::Ipv4Unicast],
    }]);

    store.create_trie(&target);
    let wide = Prefix::new("10.0.0.0".parse().unwrap(), 8).unwrap();
    let narrow = Prefix::new("10.1.0.0".parse().unwrap(), 16).unwrap();
    store.upsert_route(&target, wide, sample_path("10.0.0.1"));
    store.upsert_route(&target, narrow, sample_path("10.1.0.1"));

    let exact = Prefix::new("8.8.8.0".parse().unwrap(), 24).unwrap();
    store.upsert_route(&target, exact, sample_path("8.8.8.1"));

    let state = AppState::new(registry, store, dispatcher);
    (api::router(state), target)
}

#[tokio::test]
async fn exact_match_returns_requested_prefix() {
    let (app, target) = build_app();
    let uri = format!("/api/v1/targets/{target}/routes/lookup?prefix=8.8.8.0/24");
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["meta"]["match_type"], "exact");
    assert_eq!(json["prefix"], "8.8.8.0/24");
    assert_eq!(json["paths"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn bare_address_falls_back_to_longest_prefix_match() {
    let (app, target) = build_app();
    let uri = format!("/api/v1/targets/{target}/routes/lookup?prefix=10.1.2.3");
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["meta"]["match_type"], "longest");
    assert_eq!(json["prefix"], "10.1.0.0/16");
}

#[tokio::test]
async fn unknown_target_yields_problem_details_404() {
    let (app, _target) = build_app();
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/targets/no-such:target/routes/lookup?prefix=10.0.0.0/8")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/problem+json"
    );
}
