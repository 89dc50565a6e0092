// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Crash-safe on-disk snapshot of the route store (C2, spec section 4.2):
//! periodic and shutdown save, versioned load.

pub mod codec;
mod scheduler;

pub use scheduler::run_periodic_snapshots;

use std::path::Path;

use tracing::{info, warn};

use crate::{
    snapshot::codec::{CodecError, Snapshot, TargetSnapshot, decode, encode, entries_to_map},
    store::RouteStore,
};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to read snapshot file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to decode snapshot: {0}")]
    Codec(#[from] CodecError),
}

/// Acquires a read-only view of every target's routes, serializes them, and
/// atomically replaces the file at `path`: write to a sibling temp file,
/// flush, close, rename over the destination. On any failure the temp file
/// is removed and nothing at `path` is touched.
pub fn save(store: &RouteStore, path: &Path) -> Result<(), SnapshotError> {
    let targets: Vec<TargetSnapshot> = store
        .target_ids()
        .into_iter()
        .map(|target| {
            let entries = store.snapshot_target(&target);
            TargetSnapshot { target, entries }
        })
        .collect();

    let bytes = encode(&targets, std::time::SystemTime::now());

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp_path = path.with_extension("tmp");
    let write_result = std::fs::write(&tmp_path, &bytes);
    match write_result {
        Ok(()) => match std::fs::rename(&tmp_path, path) {
            Ok(()) => {
                info!(targets = targets.len(), bytes = bytes.len(), "snapshot saved");
                Ok(())
            },
            Err(e) => {
                let _ = std::fs::remove_file(&tmp_path);
                Err(e.into())
            },
        },
        Err(e) => {
            let _ = std::fs::remove_file(&tmp_path);
            Err(e.into())
        },
    }
}

/// If the file does not exist, succeeds with no effect (warm start on empty
/// state is legal). Otherwise decodes the envelope and rebuilds every
/// target's trie via `replace_all`.
pub fn load(store: &RouteStore, path: &Path) -> Result<(), SnapshotError> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no snapshot file found, starting empty");
            return Ok(());
        },
        Err(e) => return Err(e.into()),
    };

    let Snapshot { targets, .. } = decode(&bytes)?;
    for t in targets {
        store.create_trie(&t.target);
        store.replace_all(&t.target, entries_to_map(t.entries));
    }
    Ok(())
}

/// Runs `save`, logging and swallowing any error: a failing save never
/// halts the server.
pub fn save_best_effort(store: &RouteStore, path: &Path) {
    if let Err(e) = save(store, path) {
        warn!(error = %e, path = %path.display(), "snapshot save failed");
    }
}
