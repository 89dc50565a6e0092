// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Reference collector (spec section 4.7, supplemental): a thin,
//! test-grade implementation of the wire protocol's collector side. Gives
//! the central server something real to talk to; not a production BGP
//! speaker.

mod client;
mod probe;

pub use client::{Collector, SyntheticSession};
