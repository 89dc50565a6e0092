// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Registry (C3, spec section 4.3): collectors and their router sessions,
//! the LGTargetID index, status and counters.
//!
//! `collectors` and `lg_targets` are `DashMap`s, the teacher's own
//! concurrency primitive for a read-mostly map with per-entry mutability
//! (see `client::pool_sessions::Pool.sessions`). A `DashMap` get/insert only
//! locks the shard holding that key, so a high-rate update of one session
//! never serializes against a read of another.

use std::time::SystemTime;

use dashmap::DashMap;
use tracing::warn;

use crate::model::{Collector, CollectorStatus, LgTargetId, RouterSession, SessionStatus};

pub struct Registry {
    collectors: DashMap<String, Collector>,
    lg_targets: DashMap<LgTargetId, RouterSession>,
}

impl Default for Registry {
    fn default() -> Self {
        Registry::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Registry { collectors: DashMap::new(), lg_targets: DashMap::new() }
    }

    /// Creates the collector or updates its location/connected-at. On
    /// re-registration, removes the previous session set from both the
    /// collector and the target index before inserting the new one. Each
    /// new session is assigned `id` as its collector id before indexing.
    pub fn register_collector(
        &self,
        id: &str,
        location: &str,
        mut sessions: Vec<RouterSession>,
    ) {
        if let Some(existing) = self.collectors.get(id) {
            for session_id in &existing.session_ids {
                self.lg_targets.remove(&LgTargetId::new(id.to_string(), session_id.clone()));
            }
        }

        for s in &mut sessions {
            s.collector_id = id.to_string();
        }
        let session_ids: Vec<String> = sessions.iter().map(|s| s.session_id.clone()).collect();

        for s in sessions {
            self.lg_targets.insert(s.target_id(), s);
        }

        self.collectors.insert(id.to_string(), Collector {
            id: id.to_string(),
            location: location.to_string(),
            status: CollectorStatus::Connected,
            connected_at: SystemTime::now(),
            disconnected_at: None,
            session_ids,
        });
    }

    /// Sets the collector's status to disconnected and marks every owned
    /// session's status `down`. Sessions remain in the index so late
    /// lookups can still report the peer as offline.
    pub fn unregister_collector(&self, id: &str) {
        let Some(mut collector) = self.collectors.get_mut(id) else {
            warn!(collector_id = id, "unregister of unknown collector");
            return;
        };
        collector.status = CollectorStatus::Disconnected;
        collector.disconnected_at = Some(SystemTime::now());
        let session_ids = collector.session_ids.clone();
        drop(collector);

        for session_id in session_ids {
            if let Some(mut session) =
                self.lg_targets.get_mut(&LgTargetId::new(id.to_string(), session_id))
            {
                session.status = SessionStatus::Down;
            }
        }
    }

    pub fn get_collector(&self, id: &str) -> Option<Collector> {
        self.collectors.get(id).map(|c| c.clone())
    }

    pub fn list_collectors(&self) -> Vec<Collector> {
        self.collectors.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_target(&self, target: &LgTargetId) -> Option<RouterSession> {
        self.lg_targets.get(target).map(|s| s.clone())
    }

    pub fn get_target_by_string(&self, s: &str) -> Option<RouterSession> {
        let target: LgTargetId = s.parse().ok()?;
        self.get_target(&target)
    }

    pub fn list_targets(&self) -> Vec<RouterSession> {
        self.lg_targets.iter().map(|e| e.value().clone()).collect()
    }

    pub fn list_targets_by_collector(&self, id: &str) -> Vec<RouterSession> {
        self.lg_targets
            .iter()
            .filter(|e| e.key().collector_id == id)
            .map(|e| e.value().clone())
            .collect()
    }

    pub fn update_session_status(&self, target: &LgTargetId, status: SessionStatus) {
        if let Some(mut s) = self.lg_targets.get_mut(target) {
            s.status = status;
        }
    }

    pub fn update_session_last_update(&self, target: &LgTargetId) {
        if let Some(mut s) = self.lg_targets.get_mut(target) {
            s.last_update = SystemTime::now();
        }
    }

    pub fn update_session_route_count(&self, target: &LgTargetId, count: u64) {
        if let Some(mut s) = self.lg_targets.get_mut(target) {
            s.route_count = count;
        }
    }

    pub fn connected_collector_count(&self) -> usize {
        self.collectors
            .iter()
            .filter(|e| e.value().status != CollectorStatus::Disconnected)
            .count()
    }

    pub fn total_collector_count(&self) -> usize {
        self.collectors.len()
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::model::AddressFamilyPair;

    fn session(session_id: &str) -> RouterSession {
        RouterSession {
            collector_id: String::new(),
            session_id: session_id.to_string(),
            display_name: session_id.to_string(),
            asn: 65000,
            neighbor_address: "10.0.0.1".parse::<IpAddr>().unwrap(),
            status: SessionStatus::Pending,
            last_update: SystemTime::now(),
            route_count: 0,
            address_families: vec![AddressFamilyPair::Ipv4Unicast],
        }
    }

    #[test]
    fn register_then_lookup_by_target() {
        let reg = Registry::new();
        reg.register_collector("col-1", "fra", vec![session("sess-1")]);

        let target = LgTargetId::new("col-1", "sess-1");
        let s = reg.get_target(&target).unwrap();
        assert_eq!(s.collector_id, "col-1");

        let c = reg.get_collector("col-1").unwrap();
        assert_eq!(c.session_ids, vec!["sess-1".to_string()]);
    }

    #[test]
    fn reregister_replaces_session_set() {
        let reg = Registry::new();
        reg.register_collector("col-1", "fra", vec![session("sess-1")]);
        reg.register_collector("col-1", "fra", vec![session("sess-2")]);

        assert!(reg.get_target(&LgTargetId::new("col-1", "sess-1")).is_none());
        assert!(reg.get_target(&LgTargetId::new("col-1", "sess-2")).is_some());
    }

    #[test]
    fn unregister_marks_sessions_down_but_keeps_them_indexed() {
        let reg = Registry::new();
        reg.register_collector("col-1", "fra", vec![session("sess-1")]);
        reg.unregister_collector("col-1");

        let c = reg.get_collector("col-1").unwrap();
        assert_eq!(c.status, CollectorStatus::Disconnected);
        assert!(c.disconnected_at.is_some());

        let s = reg.get_target(&LgTargetId::new("col-1", "sess-1")).unwrap();
        assert_eq!(s.status, SessionStatus::Down);
    }

    #[test]
    fn get_target_by_string_parses_and_looks_up() {
        let reg = Registry::new();
        reg.register_collector("col-1", "fra", vec![session("sess-1")]);
        assert!(reg.get_target_by_string("col-1:sess-1").is_some());
        assert!(reg.get_target_by_string("garbage").is_none());
    }
}
