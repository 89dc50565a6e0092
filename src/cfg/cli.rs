// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;

/// Command-line arguments shared by both the `central` and `collector`
/// binaries (spec section 6): a single required `--config` path.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
pub struct CliArgs {
    /// Path to the YAML configuration file.
    #[arg(long)]
    pub config: PathBuf,
}

/// Resolves a possibly-relative config path against the current working
/// directory and canonicalizes it.
pub fn resolve_config_path<P: AsRef<Path>>(rel: P) -> Result<PathBuf> {
    let p = rel.as_ref();

    let abs = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir()
            .context("cannot get current working dir")?
            .join(p)
    };

    abs.canonicalize()
        .with_context(|| format!("failed to canonicalize path {abs:?}"))
}
