// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Names for the hardware-backed Traffic Manager fields.  A [`TmReg`] is a
//! field at a location; how that maps onto register addresses is up to the
//! ASIC implementation.

use std::fmt;

/// Index of a pipe within the device.
pub type PipeId = u8;

/// Index of a port within its pipe.
pub type LPort = u8;

/// Index of a PPG within its pipe.  PFC PPGs come first, followed by one
/// default PPG per port.
pub type PpgNum = u16;

/// Physical index of a queue within its pipe.
pub type QueueNum = u16;

/// Device-wide buffer limits.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum GlobalField {
    SkidLimit,
    SkidHysteresis,
    NegMirrorLimit,
    CellLimit,
    UcCtSize,
    McCtSize,
}

/// Thresholds on an ingress app pool or an egress pool.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum PoolField {
    GreenLimit,
    YellowLimit,
    RedLimit,
    ColorDropEnable,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum PpgField {
    IcosMask,
    PfcEnable,
    AppPool,
    GminLimit,
    SkidLimit,
    AppLimit,
    DynBaf,
    Hysteresis,
    FastRecovery,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum QProfileField {
    /// Offset of the profile's first queue within the port group.
    BaseQueue,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum PortField {
    QidProfile,
    IgLimit,
    EgLimit,
    SkidLimit,
    IgHysteresis,
    EgHysteresis,
    FlowControl,
    PfcMask,
    CtEnable,
    CtLimit,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum QueueField {
    MinLimit,
    AppLimit,
    AppPool,
    DynBaf,
    ColorDropEnable,
    YellowLimitPct,
    RedLimitPct,
    TailDropEnable,
    MinPriority,
    MaxPriority,
    RemBwPriority,
    DwrrWeight,
    SchedEnable,
    MinRateEnable,
    MaxRateEnable,
    MinRateMant,
    MinRateExp,
    MaxRateMant,
    MaxRateExp,
    MinBurst,
    MaxBurst,
    PpsMode,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum PipeField {
    EgLimit,
    EgHysteresis,
    IfgCompensation,
    NegMirrorPort,
    NegMirrorQueue,
    TimestampShift,
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum McFifoField {
    IcosBmap,
    ArbMode,
    WrrWeight,
    Depth,
}

/// The configuration domain a register belongs to.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum TmDomain {
    Global,
    IgPool,
    EgPool,
    PreFifo,
    Ppg,
    PortIcosPpg,
    QProfile,
    Port,
    Queue,
    Pipe,
    McFifo,
}

/// A single hardware-backed TM field at a specific location.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TmReg {
    Global(GlobalField),
    IgPool {
        pool: u8,
        field: PoolField,
    },
    IgPoolPfcLimit {
        pool: u8,
        icos: u8,
    },
    EgPool {
        pool: u8,
        field: PoolField,
    },
    PreFifoLimit {
        pipe: PipeId,
        fifo: u8,
    },
    Ppg {
        pipe: PipeId,
        ppg: PpgNum,
        field: PpgField,
    },
    /// The PPG that traffic arriving on `port` with the given icos is
    /// admitted against.
    PortIcosPpg {
        pipe: PipeId,
        port: LPort,
        icos: u8,
    },
    QProfile {
        pipe: PipeId,
        profile: u8,
        field: QProfileField,
    },
    /// The queue, relative to the profile's base, that a mapping slot feeds.
    QProfileMap {
        pipe: PipeId,
        profile: u8,
        slot: u8,
    },
    Port {
        pipe: PipeId,
        port: LPort,
        field: PortField,
    },
    Queue {
        pipe: PipeId,
        queue: QueueNum,
        field: QueueField,
    },
    Pipe {
        pipe: PipeId,
        field: PipeField,
    },
    McFifo {
        pipe: PipeId,
        fifo: u8,
        field: McFifoField,
    },
}

impl TmReg {
    pub fn domain(&self) -> TmDomain {
        match self {
            TmReg::Global(_) => TmDomain::Global,
            TmReg::IgPool { .. } | TmReg::IgPoolPfcLimit { .. } => {
                TmDomain::IgPool
            }
            TmReg::EgPool { .. } => TmDomain::EgPool,
            TmReg::PreFifoLimit { .. } => TmDomain::PreFifo,
            TmReg::Ppg { .. } => TmDomain::Ppg,
            TmReg::PortIcosPpg { .. } => TmDomain::PortIcosPpg,
            TmReg::QProfile { .. } | TmReg::QProfileMap { .. } => {
                TmDomain::QProfile
            }
            TmReg::Port { .. } => TmDomain::Port,
            TmReg::Queue { .. } => TmDomain::Queue,
            TmReg::Pipe { .. } => TmDomain::Pipe,
            TmReg::McFifo { .. } => TmDomain::McFifo,
        }
    }
}

impl fmt::Display for TmReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TmReg::Global(field) => write!(f, "global.{field:?}"),
            TmReg::IgPool { pool, field } => {
                write!(f, "ig_pool{pool}.{field:?}")
            }
            TmReg::IgPoolPfcLimit { pool, icos } => {
                write!(f, "ig_pool{pool}.PfcLimit[{icos}]")
            }
            TmReg::EgPool { pool, field } => {
                write!(f, "eg_pool{pool}.{field:?}")
            }
            TmReg::PreFifoLimit { pipe, fifo } => {
                write!(f, "pipe{pipe}.pre_fifo{fifo}.Limit")
            }
            TmReg::Ppg { pipe, ppg, field } => {
                write!(f, "pipe{pipe}.ppg{ppg}.{field:?}")
            }
            TmReg::PortIcosPpg { pipe, port, icos } => {
                write!(f, "pipe{pipe}.port{port}.IcosPpg[{icos}]")
            }
            TmReg::QProfile {
                pipe,
                profile,
                field,
            } => write!(f, "pipe{pipe}.q_profile{profile}.{field:?}"),
            TmReg::QProfileMap {
                pipe,
                profile,
                slot,
            } => write!(f, "pipe{pipe}.q_profile{profile}.Map[{slot}]"),
            TmReg::Port { pipe, port, field } => {
                write!(f, "pipe{pipe}.port{port}.{field:?}")
            }
            TmReg::Queue { pipe, queue, field } => {
                write!(f, "pipe{pipe}.queue{queue}.{field:?}")
            }
            TmReg::Pipe { pipe, field } => write!(f, "pipe{pipe}.{field:?}"),
            TmReg::McFifo { pipe, fifo, field } => {
                write!(f, "pipe{pipe}.mc_fifo{fifo}.{field:?}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reg_display() {
        let reg = TmReg::Ppg {
            pipe: 1,
            ppg: 3,
            field: PpgField::GminLimit,
        };
        assert_eq!(reg.to_string(), "pipe1.ppg3.GminLimit");

        let reg = TmReg::IgPoolPfcLimit { pool: 2, icos: 7 };
        assert_eq!(reg.to_string(), "ig_pool2.PfcLimit[7]");
    }

    #[test]
    fn field_names() {
        let name: &'static str = QueueField::MaxRateMant.into();
        assert_eq!(name, "MaxRateMant");
    }

    #[test]
    fn reg_domain() {
        let reg = TmReg::QProfileMap {
            pipe: 0,
            profile: 4,
            slot: 2,
        };
        assert_eq!(reg.domain(), TmDomain::QProfile);
        let reg = TmReg::IgPoolPfcLimit { pool: 0, icos: 0 };
        assert_eq!(reg.domain(), TmDomain::IgPool);
    }
}
