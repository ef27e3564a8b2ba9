// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::collections::BTreeMap;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;
use slog::{debug, info, o};

use aal::{
    AsicError, AsicResult, DevId, McFifoField, PipeField, PipeId, PortField,
    PpgField, PpgNum, QueueField, Readback, TmDomain, TmHwOps, TmReg,
    TmSizing, TofinoFamily, HYST_QUANTUM, RATE_MANTISSA_BITS,
    WAC_LIMIT_QUANTUM,
};

mod regs;

/// The model of a single device.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
pub struct StubDevice {
    pub family: TofinoFamily,
    /// Limit the model to fewer pipes than the generation provides.
    pub pipes: Option<u8>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AsicConfig {
    pub devices: BTreeMap<DevId, StubDevice>,
}

impl Default for AsicConfig {
    fn default() -> Self {
        AsicConfig {
            devices: BTreeMap::from([(0, StubDevice::default())]),
        }
    }
}

impl AsicConfig {
    /// A config describing a single device.
    pub fn single(
        dev: DevId,
        family: TofinoFamily,
        pipes: Option<u8>,
    ) -> Self {
        AsicConfig {
            devices: BTreeMap::from([(dev, StubDevice { family, pipes })]),
        }
    }
}

// Everything the model knows about one device.
struct DevState {
    family: TofinoFamily,
    sizing: TmSizing,
    // Only fields that have been written are present.  Anything else reads
    // back as its reset value.
    regs: BTreeMap<TmReg, u32>,
    drops: BTreeMap<(PipeId, PpgNum), u64>,
    intr_enabled: bool,
}

#[derive(Default)]
struct AccessCounts {
    reads: BTreeMap<TmDomain, u64>,
    writes: BTreeMap<TmDomain, u64>,
}

pub struct StubHandle {
    log: slog::Logger,
    devices: BTreeMap<DevId, Mutex<DevState>>,
    counts: Mutex<AccessCounts>,
}

impl StubHandle {
    pub fn new(log: &slog::Logger, config: &AsicConfig) -> AsicResult<Self> {
        let log = log.new(o!("unit" => "tofino_stub"));
        let mut devices = BTreeMap::new();
        for (dev, cfg) in &config.devices {
            let mut sizing = TmSizing::for_family(cfg.family);
            if let Some(pipes) = cfg.pipes {
                if pipes == 0 || pipes > sizing.pipes {
                    return Err(AsicError::InvalidArg(format!(
                        "{} has {} pipes, not {pipes}",
                        cfg.family, sizing.pipes
                    )));
                }
                sizing.pipes = pipes;
            }
            info!(log, "modeling device";
                "dev" => dev,
                "family" => %cfg.family,
                "pipes" => sizing.pipes);
            devices.insert(
                *dev,
                Mutex::new(DevState {
                    family: cfg.family,
                    sizing,
                    regs: BTreeMap::new(),
                    drops: BTreeMap::new(),
                    intr_enabled: false,
                }),
            );
        }

        Ok(StubHandle {
            log,
            devices,
            counts: Mutex::new(AccessCounts::default()),
        })
    }

    pub fn is_model(&self) -> bool {
        true
    }

    fn device(&self, dev: DevId) -> AsicResult<&Mutex<DevState>> {
        self.devices.get(&dev).ok_or(AsicError::AsicMissing)
    }

    /// Number of register reads issued against a domain, across all devices.
    pub fn read_count(&self, domain: TmDomain) -> u64 {
        let counts = self.counts.lock().unwrap();
        counts.reads.get(&domain).copied().unwrap_or(0)
    }

    /// Number of register writes issued against a domain, across all devices.
    pub fn write_count(&self, domain: TmDomain) -> u64 {
        let counts = self.counts.lock().unwrap();
        counts.writes.get(&domain).copied().unwrap_or(0)
    }

    pub fn reset_counts(&self) {
        let mut counts = self.counts.lock().unwrap();
        counts.reads.clear();
        counts.writes.clear();
    }

    /// Set the value the PPG's drop counter reports.
    pub fn ppg_drop_count_set(
        &self,
        dev: DevId,
        pipe: PipeId,
        ppg: PpgNum,
        count: u64,
    ) -> AsicResult<()> {
        let mut state = self.device(dev)?.lock().unwrap();
        if pipe >= state.sizing.pipes || ppg >= state.sizing.ppgs_per_pipe() {
            return Err(AsicError::InvalidArg(format!(
                "no ppg {ppg} on pipe {pipe}"
            )));
        }
        state.drops.insert((pipe, ppg), count);
        Ok(())
    }

    pub fn intr_enabled(&self, dev: DevId) -> AsicResult<bool> {
        Ok(self.device(dev)?.lock().unwrap().intr_enabled)
    }
}

// Fields that don't exist at all on a generation.
fn unsupported(family: TofinoFamily, reg: &TmReg) -> bool {
    matches!(
        (family, reg),
        (
            TofinoFamily::Tofino1,
            TmReg::Port {
                field: PortField::IgHysteresis,
                ..
            } | TmReg::Ppg {
                field: PpgField::FastRecovery,
                ..
            }
        )
    )
}

// Fields the model doesn't track.  Writes are accepted and dropped, and reads
// return the reset value.
fn unobservable(family: TofinoFamily, reg: &TmReg) -> bool {
    match reg {
        TmReg::McFifo {
            field: McFifoField::Depth,
            ..
        } => true,
        TmReg::Port {
            field: PortField::CtLimit,
            ..
        } => family == TofinoFamily::Tofino1,
        TmReg::Pipe {
            field: PipeField::TimestampShift,
            ..
        } => family != TofinoFamily::Tofino1,
        _ => false,
    }
}

// Translate a programmed value into the form the register holds.
fn encode(family: TofinoFamily, reg: &TmReg, value: u32) -> u32 {
    match reg {
        TmReg::Ppg {
            field: PpgField::Hysteresis,
            ..
        }
        | TmReg::Port {
            field: PortField::IgHysteresis,
            ..
        } => {
            if value % HYST_QUANTUM == 0 {
                value
            } else {
                family.default_hysteresis()
            }
        }
        TmReg::Port {
            field: PortField::IgLimit | PortField::SkidLimit,
            ..
        } => value / WAC_LIMIT_QUANTUM,
        TmReg::Queue {
            field: QueueField::MinRateMant | QueueField::MaxRateMant,
            ..
        } => value & ((1 << RATE_MANTISSA_BITS) - 1),
        TmReg::Queue {
            field: QueueField::MinRateExp | QueueField::MaxRateExp,
            ..
        } => value & 0x1f,
        _ => value,
    }
}

fn decode(reg: &TmReg, raw: u32) -> u32 {
    match reg {
        TmReg::Port {
            field: PortField::IgLimit | PortField::SkidLimit,
            ..
        } => raw.saturating_mul(WAC_LIMIT_QUANTUM),
        _ => raw,
    }
}

impl TmHwOps for StubHandle {
    fn asic_family(&self, dev: DevId) -> AsicResult<TofinoFamily> {
        Ok(self.device(dev)?.lock().unwrap().family)
    }

    fn tm_read(&self, dev: DevId, reg: TmReg) -> AsicResult<Readback> {
        let state = self.device(dev)?.lock().unwrap();
        regs::validate(&state.sizing, &reg)?;
        self.counts
            .lock()
            .unwrap()
            .reads
            .entry(reg.domain())
            .and_modify(|count| *count += 1)
            .or_insert(1);

        if unsupported(state.family, &reg) {
            return Err(AsicError::OperationUnsupported);
        }
        let default = aal::reset_value(state.family, reg);
        let current = if unobservable(state.family, &reg) {
            default
        } else {
            state
                .regs
                .get(&reg)
                .map(|raw| decode(&reg, *raw))
                .unwrap_or(default)
        };
        Ok(Readback::new(current, default))
    }

    fn tm_write(&self, dev: DevId, reg: TmReg, value: u32) -> AsicResult<()> {
        let mut state = self.device(dev)?.lock().unwrap();
        regs::validate(&state.sizing, &reg)?;
        self.counts
            .lock()
            .unwrap()
            .writes
            .entry(reg.domain())
            .and_modify(|count| *count += 1)
            .or_insert(1);

        if unsupported(state.family, &reg) {
            return Err(AsicError::OperationUnsupported);
        }
        if unobservable(state.family, &reg) {
            debug!(self.log, "dropping write to {reg}"; "dev" => dev);
            return Ok(());
        }
        let raw = encode(state.family, &reg, value);
        if raw != value {
            debug!(self.log, "{reg} stored as {raw}";
                "dev" => dev,
                "value" => value);
        }
        state.regs.insert(reg, raw);
        Ok(())
    }

    fn ppg_drop_count_get(
        &self,
        dev: DevId,
        pipe: PipeId,
        ppg: PpgNum,
    ) -> AsicResult<u64> {
        let state = self.device(dev)?.lock().unwrap();
        if pipe >= state.sizing.pipes || ppg >= state.sizing.ppgs_per_pipe() {
            return Err(AsicError::InvalidArg(format!(
                "no ppg {ppg} on pipe {pipe}"
            )));
        }
        Ok(state.drops.get(&(pipe, ppg)).copied().unwrap_or(0))
    }

    fn intr_enable_set(&self, dev: DevId, enabled: bool) -> AsicResult<()> {
        let mut state = self.device(dev)?.lock().unwrap();
        info!(self.log, "tm interrupts {}",
            if enabled { "enabled" } else { "disabled" };
            "dev" => dev);
        state.intr_enabled = enabled;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aal::{GlobalField, QProfileField};

    fn stub(family: TofinoFamily) -> StubHandle {
        let log = common::logging::test_logger();
        StubHandle::new(&log, &AsicConfig::single(0, family, Some(2))).unwrap()
    }

    #[test]
    fn test_reset_values() {
        let hdl = stub(TofinoFamily::Tofino1);
        let reg = TmReg::Global(GlobalField::CellLimit);
        let rb = hdl.tm_read(0, reg).unwrap();
        assert_eq!(rb.current, rb.default);
        assert_eq!(rb.current, 276_480);
    }

    #[test]
    fn test_hysteresis_quantized() {
        let hdl = stub(TofinoFamily::Tofino1);
        let reg = TmReg::Ppg {
            pipe: 1,
            ppg: 3,
            field: PpgField::Hysteresis,
        };
        hdl.tm_write(0, reg, 60).unwrap();
        assert_eq!(hdl.tm_read(0, reg).unwrap().current, 64);
        hdl.tm_write(0, reg, 96).unwrap();
        assert_eq!(hdl.tm_read(0, reg).unwrap().current, 96);
    }

    #[test]
    fn test_wac_limits() {
        let hdl = stub(TofinoFamily::Tofino2);
        let reg = TmReg::Port {
            pipe: 0,
            port: 4,
            field: PortField::IgLimit,
        };
        hdl.tm_write(0, reg, 1003).unwrap();
        assert_eq!(hdl.tm_read(0, reg).unwrap().current, 1000);
    }

    #[test]
    fn test_generation_gaps() {
        let t1 = stub(TofinoFamily::Tofino1);
        let t2 = stub(TofinoFamily::Tofino2);
        let fast = TmReg::Ppg {
            pipe: 0,
            ppg: 0,
            field: PpgField::FastRecovery,
        };
        assert!(matches!(
            t1.tm_read(0, fast),
            Err(AsicError::OperationUnsupported)
        ));
        t2.tm_write(0, fast, 1).unwrap();
        assert_eq!(t2.tm_read(0, fast).unwrap().current, 1);

        let ct = TmReg::Port {
            pipe: 0,
            port: 0,
            field: PortField::CtLimit,
        };
        t1.tm_write(0, ct, 40).unwrap();
        assert_eq!(t1.tm_read(0, ct).unwrap().current, 16);
        t2.tm_write(0, ct, 40).unwrap();
        assert_eq!(t2.tm_read(0, ct).unwrap().current, 40);
    }

    #[test]
    fn test_range_checks() {
        let hdl = stub(TofinoFamily::Tofino1);
        let reg = TmReg::QProfile {
            pipe: 2,
            profile: 0,
            field: QProfileField::BaseQueue,
        };
        assert!(matches!(
            hdl.tm_read(0, reg),
            Err(AsicError::InvalidArg(_))
        ));
        assert!(matches!(
            hdl.tm_read(1, TmReg::Global(GlobalField::SkidLimit)),
            Err(AsicError::AsicMissing)
        ));
    }

    #[test]
    fn test_access_counts() {
        let hdl = stub(TofinoFamily::Tofino1);
        let reg = TmReg::Pipe {
            pipe: 0,
            field: PipeField::EgLimit,
        };
        hdl.tm_write(0, reg, 100).unwrap();
        hdl.tm_read(0, reg).unwrap();
        hdl.tm_read(0, reg).unwrap();
        assert_eq!(hdl.write_count(TmDomain::Pipe), 1);
        assert_eq!(hdl.read_count(TmDomain::Pipe), 2);
        assert_eq!(hdl.read_count(TmDomain::Queue), 0);
        hdl.reset_counts();
        assert_eq!(hdl.read_count(TmDomain::Pipe), 0);
    }

    #[test]
    fn test_interrupts() {
        let hdl = stub(TofinoFamily::Tofino3);
        assert!(!hdl.intr_enabled(0).unwrap());
        hdl.intr_enable_set(0, true).unwrap();
        assert!(hdl.intr_enabled(0).unwrap());
    }
}
