// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Scenario 5 (spec section 8): a store with an IPv4 and an IPv6 target,
//! each carrying a multi-segment AS path and an aggregator, survives a
//! save/load round trip byte-for-byte.

use std::time::{Duration, SystemTime};

use lookingglass_core::{
    model::{Aggregator, AsPathSegment, BgpPath, LgTargetId, Origin, Prefix},
    snapshot,
    store::RouteStore,
};

fn sample_path(path_id: u32) -> BgpPath {
    BgpPath {
        path_id,
        next_hop: "10.0.0.1".parse().unwrap(),
        origin: Origin::Igp,
        as_path: vec![AsPathSegment::Sequence(vec![65000, 65001]), AsPathSegment::Set(vec![65002])],
        med: Some(0),
        local_pref: None,
        communities: vec![],
        extended_communities: vec![],
        large_communities: vec![],
        aggregator: Some(Aggregator { asn: 65000, address: "10.0.0.1".parse().unwrap() }),
        atomic_aggregate: true,
        best: true,
        filtered: false,
        stale: false,
        age: Duration::from_secs(42),
        received_at: SystemTime::now(),
    }
}

#[test]
fn save_then_load_preserves_routes_across_families() {
    let store = RouteStore::new();
    let v4_target = LgTargetId::new("col-1", "sess-v4");
    let v6_target = LgTargetId::new("col-1", "sess-v6");
    store.create_trie(&v4_target);
    store.create_trie(&v6_target);

    let v4_prefix = Prefix::new("198.51.100.0".parse().unwrap(), 24).unwrap();
    let v6_prefix = Prefix::new("2001:db8::".parse().unwrap(), 32).unwrap();
    store.upsert_route(&v4_target, v4_prefix, sample_path(1));
    store.upsert_route(&v6_target, v6_prefix, sample_path(2));

    let dir = std::env::temp_dir();
    let path = dir.join(format!("lg-snapshot-test-{}.bin", std::process::id()));

    snapshot::save(&store, &path).expect("save should succeed");

    let loaded = RouteStore::new();
    snapshot::load(&loaded, &path).expect("load should succeed");

    let original_v4 = store.lookup_exact(&v4_target, v4_prefix).unwrap();
    let restored_v4 = loaded.lookup_exact(&v4_target, v4_prefix).unwrap();
    assert_eq!(original_v4.paths.len(), restored_v4.paths.len());
    assert_eq!(original_v4.paths[0].med, restored_v4.paths[0].med);
    assert_eq!(original_v4.paths[0].local_pref, restored_v4.paths[0].local_pref);
    assert_eq!(original_v4.paths[0].aggregator.is_some(), restored_v4.paths[0].aggregator.is_some());

    let original_v6 = store.lookup_exact(&v6_target, v6_prefix).unwrap();
    let restored_v6 = loaded.lookup_exact(&v6_target, v6_prefix).unwrap();
    assert_eq!(original_v6.paths[0].as_path, restored_v6.paths[0].as_path);

    let _ = std::fs::remove_file(&path);
}
