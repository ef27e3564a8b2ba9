// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The per-object descriptors held by a device context.
//!
//! Every descriptor exposes its hardware-backed fields through
//! [`FieldAccess`], which lets the default-value, hardware-init, restore and
//! verify paths treat all of them the same way.  `apply` only validates and
//! stores; programming the hardware is the job of the context setters.

use strum::IntoEnumIterator;

use aal::{
    GlobalField, LPort, McFifoField, PipeField, PoolField, PortField,
    PpgField, PpgNum, QProfileField, QueueField, RateCode,
};

use crate::types::{ArbMode, FlowControl, RateKind, TmError, TmResult};

/// Largest dynamic buffer-allocation factor index.
pub const DYN_BAF_MAX: u8 = 8;

/// Largest scheduling priority.
pub const SCHED_PRIO_MAX: u8 = 7;

/// Largest DWRR weight.
pub const DWRR_WEIGHT_MAX: u32 = 1023;

/// Uniform access to the hardware-backed fields of a descriptor.
pub trait FieldAccess {
    type Field: Copy + Into<&'static str>;

    /// The field's value in the form the hardware holds it.
    fn value(&self, field: Self::Field) -> u32;

    /// Validate a value and store it in the descriptor.
    fn apply(&mut self, field: Self::Field, value: u32) -> TmResult<()>;
}

fn name(field: impl Into<&'static str>) -> &'static str {
    field.into()
}

fn flag(field: &'static str, value: u32) -> TmResult<bool> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        _ => Err(TmError::InvalidArg(format!(
            "{field} must be 0 or 1, not {value}"
        ))),
    }
}

fn bounded(field: &'static str, value: u32, max: u32) -> TmResult<u32> {
    if value > max {
        Err(TmError::InvalidArg(format!(
            "{field} must be at most {max}, not {value}"
        )))
    } else {
        Ok(value)
    }
}

fn byte(field: &'static str, value: u32) -> TmResult<u8> {
    bounded(field, value, u8::MAX.into()).map(|v| v as u8)
}

/// Thresholds on a single ingress app pool or egress pool.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolLimits {
    pub green: u32,
    pub yellow: u32,
    pub red: u32,
    pub color_drop: bool,
}

impl FieldAccess for PoolLimits {
    type Field = PoolField;

    fn value(&self, field: PoolField) -> u32 {
        match field {
            PoolField::GreenLimit => self.green,
            PoolField::YellowLimit => self.yellow,
            PoolField::RedLimit => self.red,
            PoolField::ColorDropEnable => self.color_drop.into(),
        }
    }

    fn apply(&mut self, field: PoolField, value: u32) -> TmResult<()> {
        match field {
            PoolField::GreenLimit => self.green = value,
            PoolField::YellowLimit => self.yellow = value,
            PoolField::RedLimit => self.red = value,
            PoolField::ColorDropEnable => {
                self.color_drop = flag(name(field), value)?
            }
        }
        Ok(())
    }
}

/// Buffer limits that apply to the whole device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalLimits {
    pub skid_limit: u32,
    pub skid_hysteresis: u32,
    pub neg_mirror_limit: u32,
    pub cell_limit: u32,
    pub uc_ct_size: u32,
    pub mc_ct_size: u32,
}

impl FieldAccess for GlobalLimits {
    type Field = GlobalField;

    fn value(&self, field: GlobalField) -> u32 {
        match field {
            GlobalField::SkidLimit => self.skid_limit,
            GlobalField::SkidHysteresis => self.skid_hysteresis,
            GlobalField::NegMirrorLimit => self.neg_mirror_limit,
            GlobalField::CellLimit => self.cell_limit,
            GlobalField::UcCtSize => self.uc_ct_size,
            GlobalField::McCtSize => self.mc_ct_size,
        }
    }

    fn apply(&mut self, field: GlobalField, value: u32) -> TmResult<()> {
        let slot = match field {
            GlobalField::SkidLimit => &mut self.skid_limit,
            GlobalField::SkidHysteresis => &mut self.skid_hysteresis,
            GlobalField::NegMirrorLimit => &mut self.neg_mirror_limit,
            GlobalField::CellLimit => &mut self.cell_limit,
            GlobalField::UcCtSize => &mut self.uc_ct_size,
            GlobalField::McCtSize => &mut self.mc_ct_size,
        };
        *slot = value;
        Ok(())
    }
}

/// All of the pool-level state on a device.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolCfg {
    pub ig_pools: Vec<PoolLimits>,
    /// Per ingress pool, the PFC limit for each icos.
    pub ig_pfc_limits: Vec<Vec<u32>>,
    pub eg_pools: Vec<PoolLimits>,
    pub global: GlobalLimits,
    /// Per pipe, the limit on each PRE FIFO.
    pub pre_fifo_limits: Vec<Vec<u32>>,
}

/// A priority group: the unit of ingress admission control.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PpgDesc {
    pub ppg: PpgNum,
    /// The port whose traffic is admitted against this PPG.
    pub port: Option<LPort>,
    pub icos_mask: u8,
    pub pfc: bool,
    pub app_pool: u8,
    pub gmin_limit: u32,
    pub skid_limit: u32,
    pub app_limit: u32,
    pub dyn_baf: u8,
    pub hysteresis: u32,
    pub fast_recovery: bool,
    pub in_use: bool,
    pub is_default: bool,
}

impl FieldAccess for PpgDesc {
    type Field = PpgField;

    fn value(&self, field: PpgField) -> u32 {
        match field {
            PpgField::IcosMask => self.icos_mask.into(),
            PpgField::PfcEnable => self.pfc.into(),
            PpgField::AppPool => self.app_pool.into(),
            PpgField::GminLimit => self.gmin_limit,
            PpgField::SkidLimit => self.skid_limit,
            PpgField::AppLimit => self.app_limit,
            PpgField::DynBaf => self.dyn_baf.into(),
            PpgField::Hysteresis => self.hysteresis,
            PpgField::FastRecovery => self.fast_recovery.into(),
        }
    }

    fn apply(&mut self, field: PpgField, value: u32) -> TmResult<()> {
        let n = name(field);
        match field {
            PpgField::IcosMask => self.icos_mask = byte(n, value)?,
            PpgField::PfcEnable => self.pfc = flag(n, value)?,
            PpgField::AppPool => self.app_pool = byte(n, value)?,
            PpgField::GminLimit => self.gmin_limit = value,
            PpgField::SkidLimit => self.skid_limit = value,
            PpgField::AppLimit => self.app_limit = value,
            PpgField::DynBaf => {
                self.dyn_baf = bounded(n, value, DYN_BAF_MAX.into())? as u8
            }
            PpgField::Hysteresis => self.hysteresis = value,
            PpgField::FastRecovery => self.fast_recovery = flag(n, value)?,
        }
        Ok(())
    }
}

/// The PPG fields that are programmed one at a time.  The icos mask is only
/// changed along with the port's icos-to-PPG mapping.
pub fn ppg_fields() -> impl Iterator<Item = PpgField> {
    PpgField::iter().filter(|f| *f != PpgField::IcosMask)
}

/// How a port's queues are carved out of its port group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QProfile {
    /// Offset of the first queue within the port group.
    pub base_queue: u16,
    /// Not stored in the hardware.
    pub q_count: u16,
    /// For each mapping slot, the queue relative to `base_queue`.
    pub mapping: Vec<u8>,
}

impl FieldAccess for QProfile {
    type Field = QProfileField;

    fn value(&self, field: QProfileField) -> u32 {
        match field {
            QProfileField::BaseQueue => self.base_queue.into(),
        }
    }

    fn apply(&mut self, field: QProfileField, value: u32) -> TmResult<()> {
        match field {
            QProfileField::BaseQueue => {
                self.base_queue =
                    bounded(name(field), value, u16::MAX.into())? as u16
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortDesc {
    pub port: LPort,
    pub pg: u8,
    pub qid_profile: u8,
    pub ig_limit: u32,
    pub eg_limit: u32,
    pub skid_limit: u32,
    pub ig_hysteresis: u32,
    pub eg_hysteresis: u32,
    pub flow_control: FlowControl,
    pub pfc_mask: u8,
    pub ct_enable: bool,
    pub ct_limit: u32,
    pub default_ppg: PpgNum,
    /// The PFC PPG serving each icos, if any.
    pub ppgs: Vec<Option<PpgNum>>,
}

impl FieldAccess for PortDesc {
    type Field = PortField;

    fn value(&self, field: PortField) -> u32 {
        match field {
            PortField::QidProfile => self.qid_profile.into(),
            PortField::IgLimit => self.ig_limit,
            PortField::EgLimit => self.eg_limit,
            PortField::SkidLimit => self.skid_limit,
            PortField::IgHysteresis => self.ig_hysteresis,
            PortField::EgHysteresis => self.eg_hysteresis,
            PortField::FlowControl => self.flow_control.into(),
            PortField::PfcMask => self.pfc_mask.into(),
            PortField::CtEnable => self.ct_enable.into(),
            PortField::CtLimit => self.ct_limit,
        }
    }

    fn apply(&mut self, field: PortField, value: u32) -> TmResult<()> {
        let n = name(field);
        match field {
            PortField::QidProfile => self.qid_profile = byte(n, value)?,
            PortField::IgLimit => self.ig_limit = value,
            PortField::EgLimit => self.eg_limit = value,
            PortField::SkidLimit => self.skid_limit = value,
            PortField::IgHysteresis => self.ig_hysteresis = value,
            PortField::EgHysteresis => self.eg_hysteresis = value,
            PortField::FlowControl => {
                self.flow_control = FlowControl::try_from(value)?
            }
            PortField::PfcMask => self.pfc_mask = byte(n, value)?,
            PortField::CtEnable => self.ct_enable = flag(n, value)?,
            PortField::CtLimit => self.ct_limit = value,
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueueDesc {
    /// The port that owns this queue, and the queue's index within it.
    pub port: Option<LPort>,
    pub index: u16,
    pub min_limit: u32,
    pub app_limit: u32,
    pub app_pool: u8,
    pub dyn_baf: u8,
    pub color_drop: bool,
    pub yellow_limit_pct: u8,
    pub red_limit_pct: u8,
    pub tail_drop: bool,
    pub min_priority: u8,
    pub max_priority: u8,
    pub rem_bw_priority: u8,
    pub dwrr_weight: u32,
    pub sched_enable: bool,
    pub min_rate_enable: bool,
    pub max_rate_enable: bool,
    /// Shaping rates in kbps, as programmed.
    pub min_rate: u32,
    pub max_rate: u32,
    pub min_burst: u32,
    pub max_burst: u32,
    pub pps: bool,
}

/// The mantissa and exponent fields used to program a shaping rate.
pub fn rate_fields(kind: RateKind) -> (QueueField, QueueField) {
    match kind {
        RateKind::Min => (QueueField::MinRateMant, QueueField::MinRateExp),
        RateKind::Max => (QueueField::MaxRateMant, QueueField::MaxRateExp),
    }
}

fn is_rate_code(field: QueueField) -> bool {
    matches!(
        field,
        QueueField::MinRateMant
            | QueueField::MinRateExp
            | QueueField::MaxRateMant
            | QueueField::MaxRateExp
    )
}

/// The queue fields that are programmed one at a time.  Rates are always
/// programmed as a mantissa/exponent pair.
pub fn queue_fields() -> impl Iterator<Item = QueueField> {
    QueueField::iter().filter(|f| !is_rate_code(*f))
}

impl QueueDesc {
    pub fn rate(&self, kind: RateKind) -> u32 {
        match kind {
            RateKind::Min => self.min_rate,
            RateKind::Max => self.max_rate,
        }
    }

    pub fn set_rate(&mut self, kind: RateKind, kbps: u32) {
        match kind {
            RateKind::Min => self.min_rate = kbps,
            RateKind::Max => self.max_rate = kbps,
        }
    }
}

impl FieldAccess for QueueDesc {
    type Field = QueueField;

    fn value(&self, field: QueueField) -> u32 {
        match field {
            QueueField::MinLimit => self.min_limit,
            QueueField::AppLimit => self.app_limit,
            QueueField::AppPool => self.app_pool.into(),
            QueueField::DynBaf => self.dyn_baf.into(),
            QueueField::ColorDropEnable => self.color_drop.into(),
            QueueField::YellowLimitPct => self.yellow_limit_pct.into(),
            QueueField::RedLimitPct => self.red_limit_pct.into(),
            QueueField::TailDropEnable => self.tail_drop.into(),
            QueueField::MinPriority => self.min_priority.into(),
            QueueField::MaxPriority => self.max_priority.into(),
            QueueField::RemBwPriority => self.rem_bw_priority.into(),
            QueueField::DwrrWeight => self.dwrr_weight,
            QueueField::SchedEnable => self.sched_enable.into(),
            QueueField::MinRateEnable => self.min_rate_enable.into(),
            QueueField::MaxRateEnable => self.max_rate_enable.into(),
            QueueField::MinRateMant => {
                RateCode::from_rate(self.min_rate).mantissa
            }
            QueueField::MinRateExp => {
                RateCode::from_rate(self.min_rate).exponent
            }
            QueueField::MaxRateMant => {
                RateCode::from_rate(self.max_rate).mantissa
            }
            QueueField::MaxRateExp => {
                RateCode::from_rate(self.max_rate).exponent
            }
            QueueField::MinBurst => self.min_burst,
            QueueField::MaxBurst => self.max_burst,
            QueueField::PpsMode => self.pps.into(),
        }
    }

    fn apply(&mut self, field: QueueField, value: u32) -> TmResult<()> {
        let n = name(field);
        let prio = SCHED_PRIO_MAX.into();
        match field {
            QueueField::MinLimit => self.min_limit = value,
            QueueField::AppLimit => self.app_limit = value,
            QueueField::AppPool => self.app_pool = byte(n, value)?,
            QueueField::DynBaf => {
                self.dyn_baf = bounded(n, value, DYN_BAF_MAX.into())? as u8
            }
            QueueField::ColorDropEnable => self.color_drop = flag(n, value)?,
            QueueField::YellowLimitPct => {
                self.yellow_limit_pct = bounded(n, value, 100)? as u8
            }
            QueueField::RedLimitPct => {
                self.red_limit_pct = bounded(n, value, 100)? as u8
            }
            QueueField::TailDropEnable => self.tail_drop = flag(n, value)?,
            QueueField::MinPriority => {
                self.min_priority = bounded(n, value, prio)? as u8
            }
            QueueField::MaxPriority => {
                self.max_priority = bounded(n, value, prio)? as u8
            }
            QueueField::RemBwPriority => {
                self.rem_bw_priority = bounded(n, value, prio)? as u8
            }
            QueueField::DwrrWeight => {
                self.dwrr_weight = bounded(n, value, DWRR_WEIGHT_MAX)?
            }
            QueueField::SchedEnable => self.sched_enable = flag(n, value)?,
            QueueField::MinRateEnable => {
                self.min_rate_enable = flag(n, value)?
            }
            QueueField::MaxRateEnable => {
                self.max_rate_enable = flag(n, value)?
            }
            QueueField::MinRateMant
            | QueueField::MinRateExp
            | QueueField::MaxRateMant
            | QueueField::MaxRateExp => {
                return Err(TmError::Unexpected(format!(
                    "{n} is only set as part of a rate"
                )))
            }
            QueueField::MinBurst => self.min_burst = value,
            QueueField::MaxBurst => self.max_burst = value,
            QueueField::PpsMode => self.pps = flag(n, value)?,
        }
        Ok(())
    }
}

/// Scalar state belonging to a pipe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipeCfg {
    pub eg_limit: u32,
    pub eg_hysteresis: u32,
    pub ifg_compensation: u8,
    pub neg_mirror_port: LPort,
    pub neg_mirror_queue: u8,
    pub timestamp_shift: u8,
}

impl FieldAccess for PipeCfg {
    type Field = PipeField;

    fn value(&self, field: PipeField) -> u32 {
        match field {
            PipeField::EgLimit => self.eg_limit,
            PipeField::EgHysteresis => self.eg_hysteresis,
            PipeField::IfgCompensation => self.ifg_compensation.into(),
            PipeField::NegMirrorPort => self.neg_mirror_port.into(),
            PipeField::NegMirrorQueue => self.neg_mirror_queue.into(),
            PipeField::TimestampShift => self.timestamp_shift.into(),
        }
    }

    fn apply(&mut self, field: PipeField, value: u32) -> TmResult<()> {
        let n = name(field);
        match field {
            PipeField::EgLimit => self.eg_limit = value,
            PipeField::EgHysteresis => self.eg_hysteresis = value,
            PipeField::IfgCompensation => {
                self.ifg_compensation = byte(n, value)?
            }
            PipeField::NegMirrorPort => self.neg_mirror_port = byte(n, value)?,
            PipeField::NegMirrorQueue => {
                self.neg_mirror_queue = byte(n, value)?
            }
            PipeField::TimestampShift => {
                self.timestamp_shift = bounded(n, value, 7)? as u8
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct McFifo {
    pub icos_bmap: u8,
    pub arb_mode: ArbMode,
    pub wrr_weight: u8,
    pub depth: u32,
}

impl FieldAccess for McFifo {
    type Field = McFifoField;

    fn value(&self, field: McFifoField) -> u32 {
        match field {
            McFifoField::IcosBmap => self.icos_bmap.into(),
            McFifoField::ArbMode => self.arb_mode.into(),
            McFifoField::WrrWeight => self.wrr_weight.into(),
            McFifoField::Depth => self.depth,
        }
    }

    fn apply(&mut self, field: McFifoField, value: u32) -> TmResult<()> {
        let n = name(field);
        match field {
            McFifoField::IcosBmap => self.icos_bmap = byte(n, value)?,
            McFifoField::ArbMode => self.arb_mode = ArbMode::try_from(value)?,
            McFifoField::WrrWeight => self.wrr_weight = byte(n, value)?,
            McFifoField::Depth => self.depth = value,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_rates() {
        let mut q = QueueDesc::default();
        q.set_rate(RateKind::Max, 100_000);
        let (mant, exp) = rate_fields(RateKind::Max);
        let code = RateCode {
            mantissa: q.value(mant),
            exponent: q.value(exp),
        };
        assert_eq!(code, RateCode::from_rate(100_000));
        assert!(matches!(q.apply(mant, 1), Err(TmError::Unexpected(_))));
        assert!(queue_fields().all(|f| !is_rate_code(f)));
    }

    #[test]
    fn test_apply_validation() {
        let mut q = QueueDesc::default();
        assert!(q.apply(QueueField::MaxPriority, 7).is_ok());
        assert!(q.apply(QueueField::MaxPriority, 8).is_err());
        assert!(q.apply(QueueField::TailDropEnable, 2).is_err());

        let mut ppg = PpgDesc::default();
        ppg.apply(PpgField::GminLimit, 512).unwrap();
        assert_eq!(ppg.gmin_limit, 512);
        assert!(ppg.apply(PpgField::IcosMask, 0x100).is_err());
        assert_eq!(ppg.icos_mask, 0);

        let mut port = PortDesc::default();
        port.apply(PortField::FlowControl, 1).unwrap();
        assert_eq!(port.flow_control, FlowControl::Pause);
        assert_eq!(port.value(PortField::FlowControl), 1);
    }

    #[test]
    fn test_ppg_fields() {
        assert!(!ppg_fields().any(|f| f == PpgField::IcosMask));
        assert_eq!(ppg_fields().count(), 8);
    }
}
