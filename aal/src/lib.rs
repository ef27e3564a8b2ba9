// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The ASIC abstraction layer for the Traffic Manager.  Everything the TM
//! driver knows about the hardware passes through the [`TmHwOps`] trait:
//! apply a configuration value to the silicon, or read one back.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

mod rate;
pub use rate::*;

mod regs;
pub use regs::*;

mod reset;
pub use reset::*;

mod sizing;
pub use sizing::*;

/// Identifies a single ASIC managed by this process.
pub type DevId = u8;

/// A specialized Result type for ASIC operations
pub type AsicResult<T> = Result<T, AsicError>;

/// Error type conveying additional information about ASIC errors
#[derive(Error, Debug)]
pub enum AsicError {
    /// An argument passed to the ASIC layer is invalid or inappropriate.  This
    /// indicates misbehavior from the caller.
    #[error("Invalid argument: {}", .0)]
    InvalidArg(String),
    /// An Asic function was called before the ASIC layer was properly
    /// initialized.  Indicates misbehavior from the caller.
    #[error("ASIC layer uninitialized: {}", .0)]
    Uninitialized(String),
    /// An unsupported ASIC was discovered
    #[error("Unsupported ASIC found: {}", .0)]
    AsicUnsupported(String),
    /// The field or operation has no hardware representation on the ASIC
    /// generation being used.
    #[error("Operation unsupported by the ASIC")]
    OperationUnsupported,
    /// The ASIC layer detected some internal inconsistency
    #[error("Internal error: {}",.0)]
    Internal(String),
    /// The driver or asic wasn't found
    #[error("ASIC not found")]
    AsicMissing,
    /// An error derived from a purposely triggered synthetic fault for testing
    /// purposes.
    #[error("Synthetic ASIC error: {}", .0)]
    Synthetic(String),
    /// A general indication that a caller is trying to create something that
    /// already exists.
    #[error("Already exists")]
    Exists,
    /// A general indication that a caller is trying to modify something that
    /// is not present.
    #[error("Missing")]
    Missing(String),
}

/// There are three generations of the Tofino ASIC, which the SDE refers to as
/// "families".  The TM block differs between them in sizing, in cell size,
/// and in which fields are backed by hardware at all.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum TofinoFamily {
    #[default]
    Tofino1,
    Tofino2,
    Tofino3,
}

/// The result of reading a single field back from the hardware: the value
/// currently programmed, along with the value the field holds after reset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Readback {
    pub current: u32,
    pub default: u32,
}

impl Readback {
    pub fn new(current: u32, default: u32) -> Self {
        Readback { current, default }
    }
}

/// The `TmHwOps` trait contains the hardware operations the Traffic Manager
/// driver requires.  Register addressing and DMA batching belong to the
/// implementation; the driver only names a field at a location.
pub trait TmHwOps {
    /// Reports which generation of Tofino is installed as `dev`.
    fn asic_family(&self, dev: DevId) -> AsicResult<TofinoFamily>;

    /// Read a field back from the hardware.  Fields that don't exist on this
    /// generation return [`AsicError::OperationUnsupported`].
    fn tm_read(&self, dev: DevId, reg: TmReg) -> AsicResult<Readback>;

    /// Program a field in the hardware.
    fn tm_write(&self, dev: DevId, reg: TmReg, value: u32) -> AsicResult<()>;

    /// Return the number of cells dropped by a PPG since the counter was last
    /// cleared.
    fn ppg_drop_count_get(
        &self,
        dev: DevId,
        pipe: PipeId,
        ppg: PpgNum,
    ) -> AsicResult<u64>;

    /// Enable or disable TM interrupt processing on the device.
    fn intr_enable_set(&self, dev: DevId, enabled: bool) -> AsicResult<()>;
}
