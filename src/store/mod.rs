// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Route store (C1, spec section 4.1): a per-target prefix trie supporting
//! incremental upsert/withdraw, exact lookup and longest-prefix match.
//!
//! The top-level map and each per-target trie follow a multiple-reader /
//! single-writer discipline, so lookups on one target are never blocked by
//! writes on another.

mod trie;

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::RwLock,
};

use dashmap::DashMap;

use crate::model::{BgpPath, LgTargetId, Prefix, RouteEntry};
use trie::RadixTrie;

fn prefix_key(addr: IpAddr) -> u128 {
    match addr {
        IpAddr::V4(v4) => u32::from(v4) as u128,
        IpAddr::V6(v6) => u128::from(v6),
    }
}

/// The two address-family tries backing a single target, each independently
/// lockable so an IPv4 write never blocks an IPv6 read.
struct PerTargetTrie {
    v4: RwLock<RadixTrie<RouteEntry>>,
    v6: RwLock<RadixTrie<RouteEntry>>,
    /// Cached count of distinct prefixes (not paths) across both families.
    count: RwLock<usize>,
}

impl PerTargetTrie {
    fn new() -> Self {
        PerTargetTrie {
            v4: RwLock::new(RadixTrie::new(32)),
            v6: RwLock::new(RadixTrie::new(128)),
            count: RwLock::new(0),
        }
    }
}

/// `LGTargetID -> PerTargetTrie` route store.
pub struct RouteStore {
    targets: DashMap<LgTargetId, PerTargetTrie>,
}

impl Default for RouteStore {
    fn default() -> Self {
        RouteStore::new()
    }
}

impl RouteStore {
    pub fn new() -> Self {
        RouteStore { targets: DashMap::new() }
    }

    /// Idempotent: creates an empty trie for `target` if one doesn't exist
    /// yet. Required before any `upsert_route`.
    pub fn create_trie(&self, target: &LgTargetId) {
        self.targets.entry(target.clone()).or_insert_with(PerTargetTrie::new);
    }

    /// No-op if the target has no trie yet (the sync handler may race
    /// against a late-arriving begin-snapshot).
    pub fn upsert_route(&self, target: &LgTargetId, prefix: Prefix, path: BgpPath) {
        let Some(t) = self.targets.get(target) else { return };
        let lock = if prefix.is_v4() { &t.v4 } else { &t.v6 };
        let key = prefix_key(prefix.address);

        let mut trie = lock.write().expect("route trie lock poisoned");
        match trie.get_mut(key, prefix.length) {
            Some(entry) => {
                if let Some(existing) =
                    entry.paths.iter_mut().find(|p| p.path_id == path.path_id)
                {
                    *existing = path;
                } else {
                    entry.paths.push(path);
                }
            },
            None => {
                let mut entry = RouteEntry::new(prefix);
                entry.paths.push(path);
                trie.insert(key, prefix.length, entry);
                drop(trie);
                *t.count.write().expect("route count lock poisoned") += 1;
            },
        }
    }

    /// `path_id == 0` removes the whole entry; otherwise only the path with
    /// that id. Missing target or missing prefix is a silent no-op.
    pub fn withdraw_route(&self, target: &LgTargetId, prefix: Prefix, path_id: u32) {
        let Some(t) = self.targets.get(target) else { return };
        let lock = if prefix.is_v4() { &t.v4 } else { &t.v6 };
        let key = prefix_key(prefix.address);

        let mut trie = lock.write().expect("route trie lock poisoned");
        if path_id == 0 {
            if trie.remove(key, prefix.length).is_some() {
                drop(trie);
                *t.count.write().expect("route count lock poisoned") -= 1;
            }
            return;
        }

        let Some(entry) = trie.get_mut(key, prefix.length) else { return };
        entry.paths.retain(|p| p.path_id != path_id);
        if entry.paths.is_empty() {
            trie.remove(key, prefix.length);
            drop(trie);
            *t.count.write().expect("route count lock poisoned") -= 1;
        }
    }

    pub fn lookup_exact(&self, target: &LgTargetId, prefix: Prefix) -> Option<RouteEntry> {
        let t = self.targets.get(target)?;
        let lock = if prefix.is_v4() { &t.v4 } else { &t.v6 };
        let trie = lock.read().expect("route trie lock poisoned");
        trie.get(prefix_key(prefix.address), prefix.length).cloned()
    }

    pub fn lookup_lpm(&self, target: &LgTargetId, address: IpAddr) -> Option<RouteEntry> {
        let t = self.targets.get(target)?;
        let lock = if address.is_ipv4() { &t.v4 } else { &t.v6 };
        let trie = lock.read().expect("route trie lock poisoned");
        trie.longest_match(prefix_key(address)).map(|(_, entry)| entry.clone())
    }

    /// Atomically swaps the target's trie contents with `entries`. Used by
    /// snapshot load.
    pub fn replace_all(&self, target: &LgTargetId, entries: HashMap<Prefix, RouteEntry>) {
        self.targets.remove(target);
        let t = PerTargetTrie::new();
        let mut v4_count = 0usize;
        let mut v6_count = 0usize;
        {
            let mut v4 = t.v4.write().expect("route trie lock poisoned");
            let mut v6 = t.v6.write().expect("route trie lock poisoned");
            for (prefix, entry) in entries {
                let key = prefix_key(prefix.address);
                if prefix.is_v4() {
                    v4.insert(key, prefix.length, entry);
                    v4_count += 1;
                } else {
                    v6.insert(key, prefix.length, entry);
                    v6_count += 1;
                }
            }
        }
        *t.count.write().expect("route count lock poisoned") = v4_count + v6_count;
        self.targets.insert(target.clone(), t);
    }

    /// Number of prefixes in the target's trie. Zero for unknown targets.
    pub fn count(&self, target: &LgTargetId) -> usize {
        self.targets.get(target).map(|t| *t.count.read().expect("route count lock poisoned")).unwrap_or(0)
    }

    pub fn total_routes(&self) -> usize {
        self.targets.iter().map(|e| *e.count.read().expect("route count lock poisoned")).sum()
    }

    /// Dumps every entry of a target's trie, for the snapshot codec.
    pub fn snapshot_target(&self, target: &LgTargetId) -> Vec<RouteEntry> {
        let Some(t) = self.targets.get(target) else { return Vec::new() };
        let v4 = t.v4.read().expect("route trie lock poisoned");
        let v6 = t.v6.read().expect("route trie lock poisoned");
        let mut out: Vec<RouteEntry> = v4.iter().map(|(_, _, e)| e.clone()).collect();
        out.extend(v6.iter().map(|(_, _, e)| e.clone()));
        out
    }

    pub fn target_ids(&self) -> Vec<LgTargetId> {
        self.targets.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::model::Origin;

    fn path(path_id: u32, next_hop: &str, local_pref: Option<u32>) -> BgpPath {
        BgpPath {
            path_id,
            next_hop: next_hop.parse().unwrap(),
            origin: Origin::Igp,
            as_path: vec![],
            med: None,
            local_pref,
            communities: vec![],
            extended_communities: vec![],
            large_communities: vec![],
            aggregator: None,
            atomic_aggregate: false,
            best: false,
            filtered: false,
            stale: false,
            age: Duration::from_secs(0),
            received_at: SystemTime::now(),
        }
    }

    #[test]
    fn upsert_without_trie_is_noop() {
        let store = RouteStore::new();
        let target = LgTargetId::new("col-1", "sess-1");
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 24).unwrap();
        store.upsert_route(&target, prefix, path(1, "10.0.0.1", None));
        assert_eq!(store.count(&target), 0);
    }

    #[test]
    fn exact_match_scenario() {
        let store = RouteStore::new();
        let target = LgTargetId::new("col-1", "sess-1");
        store.create_trie(&target);
        let prefix = Prefix::new("8.8.8.0".parse().unwrap(), 24).unwrap();
        store.upsert_route(&target, prefix, path(1, "10.0.0.1", Some(100)));

        let entry = store.lookup_exact(&target, prefix).unwrap();
        assert_eq!(entry.paths.len(), 1);
        assert_eq!(entry.paths[0].local_pref, Some(100));
    }

    #[test]
    fn lpm_fallback_scenario() {
        let store = RouteStore::new();
        let target = LgTargetId::new("col-1", "sess-1");
        store.create_trie(&target);
        let p8 = Prefix::new("10.0.0.0".parse().unwrap(), 8).unwrap();
        let p16 = Prefix::new("10.1.0.0".parse().unwrap(), 16).unwrap();
        store.upsert_route(&target, p8, path(1, "1.1.1.1", None));
        store.upsert_route(&target, p16, path(2, "2.2.2.2", None));

        let hit = store.lookup_lpm(&target, "10.1.2.3".parse().unwrap()).unwrap();
        assert_eq!(hit.prefix, p16);

        let hit = store.lookup_lpm(&target, "10.2.0.1".parse().unwrap()).unwrap();
        assert_eq!(hit.prefix, p8);
    }

    #[test]
    fn multi_path_upsert_and_partial_withdraw() {
        let store = RouteStore::new();
        let target = LgTargetId::new("col-1", "sess-1");
        store.create_trie(&target);
        let prefix = Prefix::new("10.0.0.0".parse().unwrap(), 24).unwrap();
        store.upsert_route(&target, prefix, path(1, "1.1.1.1", None));
        store.upsert_route(&target, prefix, path(2, "2.2.2.2", None));
        assert_eq!(store.count(&target), 1);

        let entry = store.lookup_exact(&target, prefix).unwrap();
        assert_eq!(entry.paths.len(), 2);

        store.upsert_route(&target, prefix, path(1, "9.9.9.9", None));
        let entry = store.lookup_exact(&target, prefix).unwrap();
        assert_eq!(entry.paths.len(), 2);
        let p1 = entry.paths.iter().find(|p| p.path_id == 1).unwrap();
        assert_eq!(p1.next_hop, "9.9.9.9".parse::<IpAddr>().unwrap());

        store.withdraw_route(&target, prefix, 1);
        let entry = store.lookup_exact(&target, prefix).unwrap();
        assert_eq!(entry.paths.len(), 1);
        assert_eq!(store.count(&target), 1);

        store.withdraw_route(&target, prefix, 2);
        assert!(store.lookup_exact(&target, prefix).is_none());
        assert_eq!(store.count(&target), 0);
    }

    #[test]
    fn replace_all_swaps_contents() {
        let store = RouteStore::new();
        let target = LgTargetId::new("col-1", "sess-1");
        store.create_trie(&target);
        let old_prefix = Prefix::new("10.0.0.0".parse().unwrap(), 8).unwrap();
        store.upsert_route(&target, old_prefix, path(1, "1.1.1.1", None));

        let new_prefix = Prefix::new("192.168.0.0".parse().unwrap(), 16).unwrap();
        let mut entry = RouteEntry::new(new_prefix);
        entry.paths.push(path(5, "5.5.5.5", None));
        let mut map = HashMap::new();
        map.insert(new_prefix, entry);
        store.replace_all(&target, map);

        assert!(store.lookup_exact(&target, old_prefix).is_none());
        assert!(store.lookup_exact(&target, new_prefix).is_some());
        assert_eq!(store.count(&target), 1);
    }
}
