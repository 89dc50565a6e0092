// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Shells out to the system `ping`/`traceroute` binaries and turns their
//! output into wire-ready diagnostic result chunks (spec section 4.7). The
//! one piece of real external-process execution in the reference
//! collector; parsing is intentionally minimal, just enough to populate
//! the result shapes the sync protocol defines.

use std::{net::IpAddr, process::Stdio, time::Duration};

use anyhow::{Context, Result};
use tokio::{process::Command, time::timeout};

use crate::proto::lookingglass::{self, CommandResultChunk, command_result_chunk};

fn chunk(command_id: &str, result: command_result_chunk::Result) -> CommandResultChunk {
    CommandResultChunk { command_id: command_id.to_string(), result: Some(result) }
}

pub async fn run_ping(
    command_id: &str,
    destination: IpAddr,
    count: u32,
    timeout_ms: u32,
) -> Result<Vec<CommandResultChunk>> {
    let budget = Duration::from_millis(timeout_ms as u64 * count as u64 + 2000);
    let output = timeout(
        budget,
        Command::new("ping")
            .arg("-c")
            .arg(count.to_string())
            .arg(destination.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output(),
    )
    .await
    .context("ping timed out")?
    .context("failed to spawn ping")?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut chunks = Vec::new();
    let mut received = 0u32;
    let mut rtts_ms = Vec::new();
    for (seq, line) in stdout.lines().filter(|l| l.contains("bytes from")).enumerate() {
        received += 1;
        let rtt_ms = parse_rtt_ms(line).unwrap_or(0.0);
        rtts_ms.push(rtt_ms);
        chunks.push(chunk(
            command_id,
            command_result_chunk::Result::PingResult(lookingglass::PingResult {
                seq: seq as u32,
                success: true,
                rtt_micros: (rtt_ms * 1000.0) as u64,
                ttl: parse_ttl(line).unwrap_or(0),
            }),
        ));
    }
    for seq in received..count {
        chunks.push(chunk(
            command_id,
            command_result_chunk::Result::PingResult(lookingglass::PingResult {
                seq,
                success: false,
                rtt_micros: 0,
                ttl: 0,
            }),
        ));
    }
    chunks.push(chunk(
        command_id,
        command_result_chunk::Result::PingSummary(ping_summary(count, received, &rtts_ms)),
    ));
    chunks.push(chunk(
        command_id,
        command_result_chunk::Result::Complete(lookingglass::CommandComplete {
            reached_destination_known: true,
            reached_destination: received > 0,
        }),
    ));
    Ok(chunks)
}

fn ping_summary(sent: u32, received: u32, rtts_ms: &[f64]) -> lookingglass::PingSummary {
    let loss_pct = if sent == 0 { 0.0 } else { (sent - received) as f64 / sent as f64 * 100.0 };
    let (rtt_min_ms, rtt_avg_ms, rtt_max_ms) = if rtts_ms.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let min = rtts_ms.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = rtts_ms.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let avg = rtts_ms.iter().sum::<f64>() / rtts_ms.len() as f64;
        (min, avg, max)
    };
    lookingglass::PingSummary {
        packets_sent: sent,
        packets_received: received,
        loss_pct,
        rtt_min_ms,
        rtt_avg_ms,
        rtt_max_ms,
    }
}

pub async fn run_traceroute(
    command_id: &str,
    destination: IpAddr,
    max_hops: u32,
    timeout_ms: u32,
) -> Result<Vec<CommandResultChunk>> {
    let budget = Duration::from_millis(timeout_ms as u64 * max_hops as u64 + 5000);
    let output = timeout(
        budget,
        Command::new("traceroute")
            .arg("-m")
            .arg(max_hops.to_string())
            .arg("-q")
            .arg("1")
            .arg(destination.to_string())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .output(),
    )
    .await
    .context("traceroute timed out")?
    .context("failed to spawn traceroute")?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut chunks = Vec::new();
    let mut last_address: Option<IpAddr> = None;
    for line in stdout.lines().skip(1) {
        let Some((hop_number, address, rtts)) = parse_traceroute_line(line) else { continue };
        if address.is_some() {
            last_address = address;
        }
        chunks.push(chunk(
            command_id,
            command_result_chunk::Result::TracerouteHop(lookingglass::TracerouteHop {
                hop_number,
                address: address.map(|a| super::client::encode_addr(a)).unwrap_or_default(),
                rtt_micros: rtts,
            }),
        ));
    }
    chunks.push(chunk(
        command_id,
        command_result_chunk::Result::Complete(lookingglass::CommandComplete {
            reached_destination_known: true,
            reached_destination: last_address == Some(destination),
        }),
    ));
    Ok(chunks)
}

fn parse_rtt_ms(line: &str) -> Option<f64> {
    let after = line.split("time=").nth(1)?;
    let digits: String =
        after.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    digits.parse().ok()
}

fn parse_ttl(line: &str) -> Option<u32> {
    let after = line.split("ttl=").nth(1)?;
    let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Parses a single `traceroute` output line into `(hop_number, address,
/// rtt_micros[])`. Lines for hops that timed out (`* * *`) still return a
/// hop number with no address and no RTTs.
fn parse_traceroute_line(line: &str) -> Option<(u32, Option<IpAddr>, Vec<u64>)> {
    let mut words = line.split_whitespace();
    let hop_number: u32 = words.next()?.parse().ok()?;

    let address = line
        .split('(')
        .nth(1)
        .and_then(|rest| rest.split(')').next())
        .and_then(|s| s.parse::<IpAddr>().ok());

    let rtts: Vec<u64> = line
        .split_whitespace()
        .zip(line.split_whitespace().skip(1))
        .filter(|(_, unit)| *unit == "ms")
        .filter_map(|(value, _)| value.parse::<f64>().ok())
        .map(|ms| (ms * 1000.0) as u64)
        .collect();

    Some((hop_number, address, rtts))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rtt_and_ttl_from_ping_line() {
        let line = "64 bytes from 8.8.8.8: icmp_seq=1 ttl=117 time=12.345 ms";
        assert_eq!(parse_rtt_ms(line), Some(12.345));
        assert_eq!(parse_ttl(line), Some(117));
    }

    #[test]
    fn ping_summary_computes_loss_and_rtt_stats() {
        let summary = ping_summary(4, 3, &[1.0, 2.0, 3.0]);
        assert_eq!(summary.packets_sent, 4);
        assert_eq!(summary.packets_received, 3);
        assert_eq!(summary.loss_pct, 25.0);
        assert_eq!(summary.rtt_min_ms, 1.0);
        assert_eq!(summary.rtt_avg_ms, 2.0);
        assert_eq!(summary.rtt_max_ms, 3.0);
    }

    #[test]
    fn ping_summary_handles_total_loss() {
        let summary = ping_summary(3, 0, &[]);
        assert_eq!(summary.loss_pct, 100.0);
        assert_eq!(summary.rtt_min_ms, 0.0);
        assert_eq!(summary.rtt_max_ms, 0.0);
    }

    #[test]
    fn parses_hop_with_address_and_rtt() {
        let line = " 1  192.168.1.1 (192.168.1.1)  1.234 ms";
        let (hop, addr, rtts) = parse_traceroute_line(line).unwrap();
        assert_eq!(hop, 1);
        assert_eq!(addr, Some("192.168.1.1".parse().unwrap()));
        assert_eq!(rtts, vec![1234]);
    }

    #[test]
    fn parses_timed_out_hop() {
        let line = " 3  * * *";
        let (hop, addr, rtts) = parse_traceroute_line(line).unwrap();
        assert_eq!(hop, 3);
        assert_eq!(addr, None);
        assert!(rtts.is_empty());
    }
}
