// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! General types used throughout the TM driver.

use std::convert;

use aal::AsicError;
use serde::Deserialize;
use serde::Serialize;

pub type TmResult<T> = Result<T, TmError>;

#[derive(Debug, thiserror::Error)]
pub enum TmError {
    #[error("Not supported on this device")]
    NotSupported,
    #[error("Object not found: {0}")]
    ObjectNotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Unexpected state: {0}")]
    Unexpected(String),
    #[error("Invalid argument: {0}")]
    InvalidArg(String),
    #[error("Not initialized: {0}")]
    Uninitialized(String),
    #[error("ASIC error: {0}")]
    Asic(AsicError),
}

impl convert::From<AsicError> for TmError {
    fn from(err: AsicError) -> Self {
        match err {
            AsicError::OperationUnsupported => TmError::NotSupported,
            AsicError::InvalidArg(msg) => TmError::InvalidArg(msg),
            AsicError::Missing(msg) => TmError::ObjectNotFound(msg),
            AsicError::Exists => {
                TmError::AlreadyExists("hardware object".to_string())
            }
            e => TmError::Asic(e),
        }
    }
}

/// How a device is being brought up.
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    Serialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum WarmInitMode {
    /// Every value is pushed to the hardware from scratch.
    #[default]
    Cold,
    /// The software state is rebuilt and then pushed to the hardware.
    FastReconfig,
    /// The hardware keeps running and the software state is rebuilt from
    /// it.
    Hitless,
}

/// Which of a queue's two shaping rates is meant.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumIter,
)]
pub enum RateKind {
    Min,
    Max,
}

/// Port-level flow control.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlowControl {
    #[default]
    None,
    Pause,
    Pfc,
}

impl convert::TryFrom<u32> for FlowControl {
    type Error = TmError;

    fn try_from(v: u32) -> TmResult<Self> {
        match v {
            0 => Ok(FlowControl::None),
            1 => Ok(FlowControl::Pause),
            2 => Ok(FlowControl::Pfc),
            x => Err(TmError::InvalidArg(format!("flow control mode {x}"))),
        }
    }
}

impl From<FlowControl> for u32 {
    fn from(fc: FlowControl) -> u32 {
        match fc {
            FlowControl::None => 0,
            FlowControl::Pause => 1,
            FlowControl::Pfc => 2,
        }
    }
}

/// How a multicast FIFO competes with its peers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ArbMode {
    #[default]
    Strict,
    Wrr,
}

impl convert::TryFrom<u32> for ArbMode {
    type Error = TmError;

    fn try_from(v: u32) -> TmResult<Self> {
        match v {
            0 => Ok(ArbMode::Strict),
            1 => Ok(ArbMode::Wrr),
            x => Err(TmError::InvalidArg(format!("arbitration mode {x}"))),
        }
    }
}

impl From<ArbMode> for u32 {
    fn from(mode: ArbMode) -> u32 {
        match mode {
            ArbMode::Strict => 0,
            ArbMode::Wrr => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_asic_error_mapping() {
        assert!(matches!(
            TmError::from(AsicError::OperationUnsupported),
            TmError::NotSupported
        ));
        assert!(matches!(
            TmError::from(AsicError::InvalidArg("x".into())),
            TmError::InvalidArg(_)
        ));
        assert!(matches!(
            TmError::from(AsicError::AsicMissing),
            TmError::Asic(AsicError::AsicMissing)
        ));
    }

    #[test]
    fn test_mode_names() {
        assert_eq!(
            WarmInitMode::from_str("fast-reconfig").unwrap(),
            WarmInitMode::FastReconfig
        );
        assert_eq!(WarmInitMode::Hitless.to_string(), "hitless");
        assert!(WarmInitMode::from_str("warm").is_err());
    }

    #[test]
    fn test_enum_codes() {
        assert_eq!(FlowControl::try_from(2).unwrap(), FlowControl::Pfc);
        assert!(FlowControl::try_from(3).is_err());
        assert_eq!(u32::from(ArbMode::Wrr), 1);
    }
}
