// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Command dispatcher (C4, spec section 4.4): routes diagnostic commands to
//! the correct collector and fans streamed result events back to the
//! originating request.
//!
//! `collectors` and `inflight` live in one `Mutex`-guarded struct wrapped in
//! `Arc`, matching the spec's "a single mutex... discipline" and the
//! teacher's habit of putting related mutable state behind one lock rather
//! than several that must be taken in a fixed order. Sends on event sinks
//! happen after the lock is released — never while holding it.

use std::{
    collections::HashMap,
    net::IpAddr,
    sync::Mutex,
    time::{Instant, SystemTime},
};

use tokio::sync::mpsc;
use tracing::warn;

use crate::model::{DiagnosticCommand, LgTargetId};

const COLLECTOR_QUEUE_CAPACITY: usize = 16;
const EVENT_SINK_CAPACITY: usize = 32;

/// Tagged union of result events emitted on a command's event sink (spec
/// section 4.4). The sink closes exactly once, after `Complete`, after
/// `Error`, or on collector unregister.
#[derive(Debug, Clone)]
pub enum CommandEvent {
    PingReply { seq: u32, rtt_ms: f64, ttl: u8, success: bool },
    PingSummary {
        packets_sent: u32,
        packets_received: u32,
        loss_pct: f64,
        rtt_min_ms: f64,
        rtt_avg_ms: f64,
        rtt_max_ms: f64,
    },
    TracerouteHop { hop_number: u32, address: Option<IpAddr>, rtt_ms: Vec<f64> },
    Complete { reached_destination: Option<bool> },
    Error { code: String, message: String },
}

impl CommandEvent {
    fn is_terminal(&self) -> bool {
        matches!(self, CommandEvent::Complete { .. } | CommandEvent::Error { .. })
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("collector not registered")]
    CollectorNotRegistered,
    #[error("concurrency limit reached for target")]
    ConcurrencyLimit,
    #[error("collector busy")]
    CollectorBusy,
}

struct CollectorQueue {
    tx: mpsc::Sender<DiagnosticCommand>,
    rx: Option<mpsc::Receiver<DiagnosticCommand>>,
}

struct InflightCommand {
    cmd: DiagnosticCommand,
    event_tx: mpsc::Sender<CommandEvent>,
    #[allow(dead_code)]
    created_at: Instant,
}

#[derive(Default)]
struct State {
    collectors: HashMap<String, CollectorQueue>,
    inflight: HashMap<String, InflightCommand>,
}

pub struct Dispatcher {
    state: Mutex<State>,
    max_per_target: usize,
}

impl Dispatcher {
    pub fn new(max_per_target: usize) -> Self {
        Dispatcher { state: Mutex::new(State::default()), max_per_target }
    }

    /// Idempotent: creates the bounded command queue if absent.
    pub fn register_collector(&self, id: &str) {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        if state.collectors.contains_key(id) {
            return;
        }
        let (tx, rx) = mpsc::channel(COLLECTOR_QUEUE_CAPACITY);
        state.collectors.insert(id.to_string(), CollectorQueue { tx, rx: Some(rx) });
    }

    /// Hands out the queue's read side, consumed by the collector's
    /// command-subscription stream. Returns `None` if already taken or the
    /// collector isn't registered.
    pub fn get_command_channel(&self, id: &str) -> Option<mpsc::Receiver<DiagnosticCommand>> {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        state.collectors.get_mut(id)?.rx.take()
    }

    /// Atomically verifies the collector is registered, checks the
    /// per-target concurrency cap, installs an in-flight entry, and
    /// try-sends the command onto the collector's queue, rolling back on
    /// failure. Returns the event sink's read side.
    pub fn dispatch(
        &self,
        cmd: DiagnosticCommand,
    ) -> Result<mpsc::Receiver<CommandEvent>, DispatchError> {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");

        let collector_id = cmd.target.collector_id.clone();
        if !state.collectors.contains_key(&collector_id) {
            return Err(DispatchError::CollectorNotRegistered);
        }

        let in_flight_for_target = state
            .inflight
            .values()
            .filter(|c| c.cmd.target == cmd.target)
            .count();
        if in_flight_for_target >= self.max_per_target {
            return Err(DispatchError::ConcurrencyLimit);
        }

        let (event_tx, event_rx) = mpsc::channel(EVENT_SINK_CAPACITY);
        let command_id = cmd.command_id.clone();
        state.inflight.insert(command_id.clone(), InflightCommand {
            cmd: cmd.clone(),
            event_tx,
            created_at: Instant::now(),
        });

        let queue_tx = state.collectors.get(&collector_id).expect("checked above").tx.clone();
        if queue_tx.try_send(cmd).is_err() {
            state.inflight.remove(&command_id);
            return Err(DispatchError::CollectorBusy);
        }

        Ok(event_rx)
    }

    /// Non-blocking send to the in-flight sink. Unknown commands drop the
    /// event; a full sink (slow consumer) drops it with a warning. Terminal
    /// events additionally remove the in-flight entry, closing the sink.
    pub fn report_result(&self, command_id: &str, event: CommandEvent) {
        let terminal = event.is_terminal();
        let event_tx = {
            let mut state = self.state.lock().expect("dispatcher lock poisoned");
            if terminal {
                state.inflight.remove(command_id).map(|c| c.event_tx)
            } else {
                state.inflight.get(command_id).map(|c| c.event_tx.clone())
            }
        };

        let Some(event_tx) = event_tx else { return };
        if event_tx.try_send(event).is_err() {
            warn!(command_id, "event sink full or closed, dropping event");
        }
    }

    /// Removes the in-flight entry and closes its sink. Called on terminal
    /// events via `report_result`, or directly by a caller that wants to
    /// give up on a command without emitting a final event.
    pub fn complete_command(&self, command_id: &str) {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        state.inflight.remove(command_id);
    }

    /// Removes the collector's queue (dropping its sender unblocks the
    /// command-subscription reader once it next polls) and sweeps the
    /// in-flight table for commands targeting that collector, sending each
    /// an `error("collector disconnected")` event before closing its sink.
    ///
    /// Commands still sitting unconsumed in the collector's queue buffer are
    /// dropped without a separate error event: every command already has an
    /// in-flight entry from the moment `dispatch` installs it (before the
    /// queue send), so the in-flight sweep below covers both delivered and
    /// still-queued commands.
    pub fn unregister_collector(&self, id: &str) {
        let mut state = self.state.lock().expect("dispatcher lock poisoned");
        state.collectors.remove(id);

        let orphaned: Vec<(String, mpsc::Sender<CommandEvent>)> = state
            .inflight
            .iter()
            .filter(|(_, c)| c.cmd.target.collector_id == id)
            .map(|(command_id, c)| (command_id.clone(), c.event_tx.clone()))
            .collect();
        for (command_id, _) in &orphaned {
            state.inflight.remove(command_id);
        }
        drop(state);

        for (command_id, event_tx) in orphaned {
            let _ = event_tx.try_send(CommandEvent::Error {
                code: "collector_disconnected".to_string(),
                message: "collector disconnected".to_string(),
            });
            let _ = command_id;
        }
    }

    #[cfg(test)]
    fn inflight_count_for(&self, target: &LgTargetId) -> usize {
        let state = self.state.lock().expect("dispatcher lock poisoned");
        state.inflight.values().filter(|c| &c.cmd.target == target).count()
    }
}

#[cfg(test)]
mod tests {
    use std::net::IpAddr;

    use super::*;
    use crate::model::{CommandParams, CommandStatus};

    fn ping(target: LgTargetId, id: &str) -> DiagnosticCommand {
        DiagnosticCommand {
            command_id: id.to_string(),
            target,
            destination: "8.8.8.8".parse::<IpAddr>().unwrap(),
            params: CommandParams::Ping { count: 5, timeout_ms: 2000, packet_size: 56 },
            status: CommandStatus::Pending,
            client_ip: "127.0.0.1".parse().unwrap(),
            created_at: SystemTime::now(),
            completed_at: None,
        }
    }

    #[test]
    fn dispatch_without_registered_collector_fails() {
        let d = Dispatcher::new(2);
        let target = LgTargetId::new("col-1", "sess-1");
        let err = d.dispatch(ping(target, "cmd-1")).unwrap_err();
        assert_eq!(err, DispatchError::CollectorNotRegistered);
    }

    #[test]
    fn concurrency_limit_is_enforced_per_target() {
        let d = Dispatcher::new(1);
        d.register_collector("col-1");
        let target = LgTargetId::new("col-1", "sess-1");
        assert!(d.dispatch(ping(target.clone(), "cmd-1")).is_ok());
        let err = d.dispatch(ping(target, "cmd-2")).unwrap_err();
        assert_eq!(err, DispatchError::ConcurrencyLimit);
    }

    #[test]
    fn complete_command_frees_the_concurrency_slot() {
        let d = Dispatcher::new(1);
        d.register_collector("col-1");
        let target = LgTargetId::new("col-1", "sess-1");
        d.dispatch(ping(target.clone(), "cmd-1")).unwrap();
        assert_eq!(d.inflight_count_for(&target), 1);
        d.complete_command("cmd-1");
        assert_eq!(d.inflight_count_for(&target), 0);
        assert!(d.dispatch(ping(target, "cmd-2")).is_ok());
    }

    #[tokio::test]
    async fn disconnect_sweep_errors_all_inflight_commands() {
        let d = Dispatcher::new(2);
        d.register_collector("col-1");
        let target = LgTargetId::new("col-1", "sess-1");

        let mut rx1 = d.dispatch(ping(target.clone(), "cmd-1")).unwrap();
        let mut rx2 = d.dispatch(ping(target.clone(), "cmd-2")).unwrap();

        d.unregister_collector("col-1");

        let ev1 = rx1.recv().await.unwrap();
        assert!(matches!(ev1, CommandEvent::Error { .. }));
        assert!(rx1.recv().await.is_none());

        let ev2 = rx2.recv().await.unwrap();
        assert!(matches!(ev2, CommandEvent::Error { .. }));
        assert!(rx2.recv().await.is_none());

        assert_eq!(d.inflight_count_for(&target), 0);
        d.register_collector("col-1");
        assert!(d.dispatch(ping(target, "cmd-3")).is_ok());
    }

    #[tokio::test]
    async fn report_result_then_complete_closes_sink_exactly_once() {
        let d = Dispatcher::new(2);
        d.register_collector("col-1");
        let target = LgTargetId::new("col-1", "sess-1");
        let mut rx = d.dispatch(ping(target, "cmd-1")).unwrap();

        d.report_result("cmd-1", CommandEvent::PingReply {
            seq: 1,
            rtt_ms: 1.23,
            ttl: 64,
            success: true,
        });
        d.report_result("cmd-1", CommandEvent::Complete { reached_destination: Some(true) });

        let first = rx.recv().await.unwrap();
        assert!(matches!(first, CommandEvent::PingReply { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second, CommandEvent::Complete { .. }));
        assert!(rx.recv().await.is_none());
    }
}
