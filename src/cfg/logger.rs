// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cfg::{
    config::LoggerConfig,
    enums::{LogFormat, LogOutput},
};

/// Initializes the global `tracing` subscriber from a [`LoggerConfig`].
///
/// Returns a [`WorkerGuard`] that must be held for the lifetime of the
/// process when logging to a file (dropping it flushes and stops the
/// background writer thread).
pub fn init_logger(cfg: &LoggerConfig) -> Result<WorkerGuard> {
    let env_filter = EnvFilter::try_new(&cfg.level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .context("failed to parse log level from config or env")?;

    let (writer, guard) = make_writer(cfg)?;

    match cfg.format {
        LogFormat::Json => {
            let layer = fmt::layer().with_writer(writer).with_ansi(false).json();
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .context("failed to install tracing subscriber")?;
        },
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(matches!(cfg.output, LogOutput::Stdout | LogOutput::Stderr));
            tracing_subscriber::registry()
                .with(env_filter)
                .with(layer)
                .try_init()
                .context("failed to install tracing subscriber")?;
        },
    }

    Ok(guard)
}

fn make_writer(
    cfg: &LoggerConfig,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    match cfg.output {
        LogOutput::Stdout => Ok(tracing_appender::non_blocking(std::io::stdout())),
        LogOutput::Stderr => Ok(tracing_appender::non_blocking(std::io::stderr())),
        LogOutput::File => {
            let path = cfg
                .file_path
                .as_deref()
                .context("logger.file_path is required for output=file")?;
            let path = PathBuf::from(path);
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path.file_name().context("logger.file_path has no file name")?;
            let appender = tracing_appender::rolling::never(dir, file_name);
            Ok(tracing_appender::non_blocking(appender))
        },
    }
}
