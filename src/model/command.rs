// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{net::IpAddr, time::SystemTime};

use serde::{Deserialize, Serialize};

use crate::model::collector::LgTargetId;

/// The kind of diagnostic a [`DiagnosticCommand`] asks a router session to
/// run (spec section 3/5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Ping,
    Traceroute,
}

/// Parameters for a diagnostic command. The variant always matches the
/// command's [`CommandKind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandParams {
    Ping {
        #[serde(default = "default_ping_count")]
        count: u32,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u32,
        #[serde(default = "default_packet_size")]
        packet_size: u32,
    },
    Traceroute {
        #[serde(default = "default_max_hops")]
        max_hops: u8,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u32,
    },
}

fn default_ping_count() -> u32 {
    5
}

fn default_max_hops() -> u8 {
    30
}

fn default_timeout_ms() -> u32 {
    2000
}

fn default_packet_size() -> u32 {
    56
}

impl CommandParams {
    pub fn kind(&self) -> CommandKind {
        match self {
            CommandParams::Ping { .. } => CommandKind::Ping,
            CommandParams::Traceroute { .. } => CommandKind::Traceroute,
        }
    }
}

/// Lifecycle status of an in-flight [`DiagnosticCommand`] (spec section 3/4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Timeout,
}

/// A diagnostic command dispatched to a single router session. Exists in the
/// dispatcher's in-flight table for exactly the duration its event channel
/// is open; deleted on completion, error or collector disconnect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticCommand {
    /// Random 128-bit id, rendered as hex.
    pub command_id: String,
    pub target: LgTargetId,
    pub destination: IpAddr,
    pub params: CommandParams,
    pub status: CommandStatus,
    /// Remote address of the HTTP request that originated this command.
    /// Forwarded headers are never consulted (spec section 9, open question
    /// c): no trusted-proxy list is configured for this deployment shape.
    pub client_ip: IpAddr,
    pub created_at: SystemTime,
    pub completed_at: Option<SystemTime>,
}

impl DiagnosticCommand {
    pub fn kind(&self) -> CommandKind {
        self.params.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_kind_matches_variant() {
        let p = CommandParams::Ping { count: 3, timeout_ms: 2000, packet_size: 56 };
        assert_eq!(p.kind(), CommandKind::Ping);

        let p = CommandParams::Traceroute { max_hops: 16, timeout_ms: 2000 };
        assert_eq!(p.kind(), CommandKind::Traceroute);
    }
}
