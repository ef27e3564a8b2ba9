// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The Traffic Manager driver core.
//!
//! Each device is described by a [`ctx::TmCtx`], an in-memory mirror of the
//! buffer, queueing and scheduling configuration programmed into the ASIC.
//! Following a process restart, [`restore`] rebuilds a context from the
//! values still live in the hardware, and [`verify`] compares a restored
//! context against a known-good one.  [`device::TmRegistry`] ties these
//! together into the device lifecycle.

pub mod config;
pub mod ctx;
pub mod device;
pub mod ppg_state;
pub mod restore;
pub mod types;
pub mod verify;
