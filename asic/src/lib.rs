// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Implementations of the Traffic Manager hardware contract.  The
//! `tofino_stub` model keeps registers in memory and reproduces the
//! quantization and per-generation gaps of the real silicon.  The `chaos`
//! wrapper sits in front of any other implementation and injects failures.

#[cfg(not(any(feature = "tofino_stub", feature = "chaos")))]
compile_error! {"must set tofino_stub or chaos feature"}

#[cfg(feature = "tofino_stub")]
pub mod tofino_stub;

#[cfg(feature = "chaos")]
pub mod chaos;
