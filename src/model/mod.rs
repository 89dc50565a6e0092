// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Core data model (spec section 3): collectors, router sessions, targets,
//! routes and diagnostic commands.

pub mod collector;
pub mod command;
pub mod route;

pub use collector::{
    AddressFamilyPair, Collector, CollectorStatus, LgTargetId, ParseLgTargetIdError,
    RouterSession, SessionStatus,
};
pub use command::{CommandKind, CommandParams, CommandStatus, DiagnosticCommand};
pub use route::{
    Aggregator, AsPathSegment, BgpPath, ExtendedCommunity, LargeCommunity, Origin,
    Prefix, PrefixError, RouteEntry, StandardCommunity,
};
