// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Generated gRPC client/server code for the collector-central wire
//! protocol (spec section 6), compiled from `proto/lookingglass.proto` by
//! `build.rs` via `tonic-build`.

#![allow(clippy::all)]

pub mod lookingglass {
    tonic::include_proto!("lookingglass.v1");
}
