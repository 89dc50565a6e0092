// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::cfg::enums::{LogFormat, LogOutput};

/// Top-level configuration for either the `central` or `collector` binary.
///
/// Only the sections a given binary uses are populated from the YAML file in
/// practice, but both share this struct so the two executables can load the
/// same file shape and the environment-variable override discipline (section
/// 6 of the spec) stays identical between them.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Central server's gRPC and HTTP listen configuration.
    #[serde(default)]
    pub central: CentralConfig,
    /// Collector's connection configuration (address of the central server).
    #[serde(default)]
    pub collector: CollectorConfig,
    /// mTLS material shared by both sides.
    #[serde(default)]
    pub tls: TlsConfig,
    /// On-disk snapshot persistence.
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Command dispatcher limits.
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    /// Logging configuration.
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            central: CentralConfig::default(),
            collector: CollectorConfig::default(),
            tls: TlsConfig::default(),
            snapshot: SnapshotConfig::default(),
            dispatcher: DispatcherConfig::default(),
            logger: LoggerConfig::default(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CentralConfig {
    /// Address the gRPC server (collector-facing) binds to.
    pub grpc_listen_addr: String,
    /// Address the HTTP/SSE API server (operator-facing) binds to.
    pub http_listen_addr: String,
    /// Graceful shutdown budget before the process force-exits.
    #[serde(with = "serde_secs")]
    pub shutdown_timeout: Duration,
}

impl Default for CentralConfig {
    fn default() -> Self {
        CentralConfig {
            grpc_listen_addr: "0.0.0.0:7070".to_string(),
            http_listen_addr: "0.0.0.0:8080".to_string(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CollectorConfig {
    /// Identity presented when mTLS is not configured (dev mode).
    pub collector_id: String,
    /// Human-readable location reported at registration.
    pub location: String,
    /// Address of the central server's gRPC endpoint.
    pub central_addr: String,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        CollectorConfig {
            collector_id: "collector-dev".to_string(),
            location: "unknown".to_string(),
            central_addr: "http://127.0.0.1:7070".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct TlsConfig {
    /// Whether mutual TLS is enabled. When false, collector identity is
    /// inferred from the registry by session id (dev mode, spec 4.5).
    #[serde(default)]
    pub mtls_enabled: bool,
    #[serde(default)]
    pub cert_path: Option<String>,
    #[serde(default)]
    pub key_path: Option<String>,
    #[serde(default)]
    pub ca_path: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SnapshotConfig {
    /// Path to the snapshot file.
    pub path: String,
    /// Interval between periodic saves.
    #[serde(with = "serde_secs")]
    pub interval: Duration,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            path: "data/snapshot.bin".to_string(),
            interval: Duration::from_secs(60),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DispatcherConfig {
    /// Cap on concurrent in-flight commands for a single LGTarget.
    pub max_per_target: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig { max_per_target: 2 }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggerConfig {
    pub level: String,
    pub output: LogOutput,
    pub format: LogFormat,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            format: LogFormat::Json,
            file_path: None,
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, then applies environment-variable
    /// overrides for listen addresses and TLS paths (spec section 6).
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path.as_ref()).with_context(|| {
            format!("failed to read config file {:?}", path.as_ref())
        })?;
        let mut cfg: Config =
            serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.apply_env_overrides();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("LG_GRPC_LISTEN_ADDR") {
            self.central.grpc_listen_addr = v;
        }
        if let Ok(v) = std::env::var("LG_HTTP_LISTEN_ADDR") {
            self.central.http_listen_addr = v;
        }
        if let Ok(v) = std::env::var("LG_CENTRAL_ADDR") {
            self.collector.central_addr = v;
        }
        if let Ok(v) = std::env::var("LG_TLS_CERT_PATH") {
            self.tls.cert_path = Some(v);
        }
        if let Ok(v) = std::env::var("LG_TLS_KEY_PATH") {
            self.tls.key_path = Some(v);
        }
        if let Ok(v) = std::env::var("LG_TLS_CA_PATH") {
            self.tls.ca_path = Some(v);
        }
    }

    fn validate(&self) -> Result<()> {
        ensure!(
            self.dispatcher.max_per_target >= 1,
            "dispatcher.max_per_target must be >= 1"
        );
        if self.tls.mtls_enabled {
            ensure!(
                self.tls.cert_path.is_some()
                    && self.tls.key_path.is_some()
                    && self.tls.ca_path.is_some(),
                "tls.mtls_enabled requires cert_path, key_path and ca_path"
            );
        }
        Ok(())
    }
}

mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}
