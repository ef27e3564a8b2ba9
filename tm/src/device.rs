// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The set of devices managed by the driver, and their lifecycle.
//!
//! A device is added with one of three warm-init modes.  A cold boot builds
//! a context from the reset values and programs all of it into the
//! hardware.  A fast reconfig does the same.  A hitless restart leaves the
//! hardware alone and rebuilds the context from what is programmed into it;
//! if that fails, the device is cold booted instead.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use slog::{error, info, o, Logger};

use aal::{DevId, LPort, PipeId, PpgNum, TmHwOps, TofinoFamily};

use crate::config::TmConfig;
use crate::ctx::{CounterHandle, TmCtx};
use crate::ppg_state::{PpgHdl, PpgId, PpgStateMap};
use crate::restore::restore_device_cfg;
use crate::types::{TmError, TmResult, WarmInitMode};
use crate::verify::{verify_device_cfg, DomainReport};

/// The number of devices a single driver instance can manage.
pub const TM_NUM_ASIC: DevId = 8;

/// The state held for one device.
#[derive(Debug)]
pub struct TmDevice {
    pub ctx: Mutex<TmCtx>,
    pub ppg_state: PpgStateMap,
}

pub struct TmRegistry<H: TmHwOps> {
    log: Logger,
    hw: H,
    config: TmConfig,
    devices: Mutex<BTreeMap<DevId, Arc<TmDevice>>>,
}

// Rebuild the id/handle map of a restored device.  The ids handed out
// before the restart are gone, so each PPG is known by its own number.
fn ppg_state_from(ctx: &TmCtx) -> TmResult<PpgStateMap> {
    let map = PpgStateMap::new(ctx.sizing.pipes);
    {
        let mut state = map.lock();
        for (pipe, p) in (0..).zip(&ctx.pipes) {
            for ppg in p.ppgs.iter().filter(|d| d.in_use && !d.is_default) {
                let hdl = PpgHdl::from(ppg.ppg);
                state.add(pipe, hdl, hdl)?;
                state.counter_add(pipe, hdl, hdl)?;
            }
        }
    }
    Ok(map)
}

fn ppg_num(hdl: PpgHdl) -> TmResult<PpgNum> {
    PpgNum::try_from(hdl).map_err(|_| {
        TmError::Unexpected(format!("ppg handle {hdl:#x} out of range"))
    })
}

impl<H: TmHwOps> TmRegistry<H> {
    pub fn new(log: &Logger, hw: H, config: TmConfig) -> Self {
        TmRegistry {
            log: log.new(o!("unit" => "tm")),
            hw,
            config,
            devices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    pub fn config(&self) -> &TmConfig {
        &self.config
    }

    pub fn device(&self, dev: DevId) -> TmResult<Arc<TmDevice>> {
        self.devices
            .lock()
            .unwrap()
            .get(&dev)
            .cloned()
            .ok_or_else(|| TmError::ObjectNotFound(format!("device {dev}")))
    }

    pub fn devices(&self) -> Vec<DevId> {
        self.devices.lock().unwrap().keys().copied().collect()
    }

    fn cold_init(&self, dev: DevId, family: TofinoFamily) -> TmResult<TmCtx> {
        let mut ctx = TmCtx::new(dev, family, &self.config)?;
        ctx.hw_init(&self.log, &self.hw)?;
        Ok(ctx)
    }

    fn hitless_init(
        &self,
        dev: DevId,
        family: TofinoFamily,
    ) -> TmResult<(TmCtx, PpgStateMap)> {
        let mut ctx = TmCtx::new(dev, family, &self.config)?;
        restore_device_cfg(&self.log, &self.hw, &mut ctx)?;
        let ppg_state = ppg_state_from(&ctx)?;
        Ok((ctx, ppg_state))
    }

    /// Bring a device under management.
    pub fn device_add(
        &self,
        dev: DevId,
        family: TofinoFamily,
        mode: WarmInitMode,
    ) -> TmResult<()> {
        if dev >= TM_NUM_ASIC {
            return Err(TmError::InvalidArg(format!(
                "device {dev} out of range (max {})",
                TM_NUM_ASIC - 1
            )));
        }
        let installed = self.hw.asic_family(dev)?;
        if installed != family {
            return Err(TmError::InvalidArg(format!(
                "device {dev} is a {installed}, not a {family}"
            )));
        }

        let mut devices = self.devices.lock().unwrap();
        if devices.contains_key(&dev) {
            return Err(TmError::AlreadyExists(format!("device {dev}")));
        }
        info!(self.log, "adding device";
            "dev" => dev,
            "family" => %family,
            "mode" => %mode);

        let restored = match mode {
            WarmInitMode::Hitless => match self.hitless_init(dev, family) {
                Ok(restored) => Some(restored),
                Err(e) => {
                    error!(self.log, "hitless restart failed, cold booting";
                        "dev" => dev,
                        "error" => %e);
                    None
                }
            },
            WarmInitMode::Cold | WarmInitMode::FastReconfig => None,
        };
        let (mut ctx, ppg_state) = match restored {
            Some(restored) => restored,
            None => {
                let ctx = self.cold_init(dev, family)?;
                let ppg_state = PpgStateMap::new(ctx.sizing.pipes);
                (ctx, ppg_state)
            }
        };
        ctx.warm_init_mode = mode;
        devices.insert(
            dev,
            Arc::new(TmDevice {
                ctx: Mutex::new(ctx),
                ppg_state,
            }),
        );

        // The device keeps its new context even if interrupts can't be
        // turned back on.
        if let Err(e) = self.hw.intr_enable_set(dev, true) {
            error!(self.log, "failed to enable interrupts";
                "dev" => dev,
                "error" => %e);
            return Err(e.into());
        }
        Ok(())
    }

    pub fn device_remove(&self, dev: DevId) -> TmResult<()> {
        match self.devices.lock().unwrap().remove(&dev) {
            Some(_) => {
                info!(self.log, "removed device"; "dev" => dev);
                Ok(())
            }
            None => Err(TmError::ObjectNotFound(format!("device {dev}"))),
        }
    }

    /// Prepare a device for a warm restart.  Interrupts are disabled and the
    /// driver's state for the device is discarded, to be rebuilt when the
    /// device is next added.
    pub fn warm_init_begin(
        &self,
        dev: DevId,
        mode: WarmInitMode,
    ) -> TmResult<()> {
        if mode == WarmInitMode::Cold {
            return Err(TmError::InvalidArg(
                "a cold boot is not a warm init".to_string(),
            ));
        }
        self.hw.intr_enable_set(dev, false)?;
        let removed = self.devices.lock().unwrap().remove(&dev).is_some();
        info!(self.log, "warm init begun";
            "dev" => dev,
            "mode" => %mode,
            "removed" => removed);
        Ok(())
    }

    /// Run `f` on a device's context, with the device locked.
    pub fn with_ctx<T, F>(&self, dev: DevId, f: F) -> TmResult<T>
    where
        F: FnOnce(&mut TmCtx, &H) -> TmResult<T>,
    {
        let device = self.device(dev)?;
        let mut ctx = device.ctx.lock().unwrap();
        f(&mut ctx, &self.hw)
    }

    /// Allocate a PFC PPG for a port, to be known to the client by `ppg_id`.
    pub fn ppg_create(
        &self,
        dev: DevId,
        pipe: PipeId,
        ppg_id: PpgId,
        port: LPort,
    ) -> TmResult<PpgHdl> {
        let device = self.device(dev)?;
        let mut ctx = device.ctx.lock().unwrap();
        let mut state = device.ppg_state.lock();
        if state.get(pipe, ppg_id).is_ok() {
            return Err(TmError::AlreadyExists(format!(
                "ppg id {ppg_id} on pipe {pipe}"
            )));
        }

        let ppg = ctx.ppg_allocate(&self.hw, pipe, port)?;
        let hdl = PpgHdl::from(ppg);
        if let Err(e) = state.add(pipe, ppg_id, hdl) {
            ctx.ppg_free(&self.hw, pipe, ppg)?;
            return Err(e);
        }
        if let Err(e) = state.counter_add(pipe, hdl, ppg_id) {
            state.del(pipe, ppg_id)?;
            ctx.ppg_free(&self.hw, pipe, ppg)?;
            return Err(e);
        }
        Ok(hdl)
    }

    pub fn ppg_delete(
        &self,
        dev: DevId,
        pipe: PipeId,
        ppg_id: PpgId,
    ) -> TmResult<()> {
        let device = self.device(dev)?;
        let mut ctx = device.ctx.lock().unwrap();
        let mut state = device.ppg_state.lock();
        let hdl = state.get(pipe, ppg_id)?;
        ctx.ppg_free(&self.hw, pipe, ppg_num(hdl)?)?;
        state.del(pipe, ppg_id)?;
        state.counter_del(pipe, hdl)?;
        Ok(())
    }

    /// The PPG backing a client's PPG id.
    pub fn ppg_lookup(
        &self,
        dev: DevId,
        pipe: PipeId,
        ppg_id: PpgId,
    ) -> TmResult<PpgNum> {
        ppg_num(self.device(dev)?.ppg_state.get(pipe, ppg_id)?)
    }

    /// Fetch a PPG's drop count from the hardware.
    pub fn ppg_drop_count(
        &self,
        dev: DevId,
        pipe: PipeId,
        ppg_id: PpgId,
    ) -> TmResult<u64> {
        let ppg = self.ppg_lookup(dev, pipe, ppg_id)?;
        self.with_ctx(dev, |ctx, hw| {
            let port = ctx.ppg(pipe, ppg)?.port.ok_or_else(|| {
                TmError::Unexpected(format!("ppg {ppg} has no port"))
            })?;
            ctx.drop_counter_refresh(hw, CounterHandle { pipe, port, ppg })
        })
    }

    /// Restore the device's configuration into a scratch context and
    /// compare it with the live one.  The live context is not changed.
    pub fn ut_restore_device_cfg(
        &self,
        dev: DevId,
    ) -> TmResult<Vec<DomainReport>> {
        let device = self.device(dev)?;
        let live = device.ctx.lock().unwrap();
        let mut restored = TmCtx::new(dev, live.family, &self.config)?;
        if let Err(e) = restore_device_cfg(&self.log, &self.hw, &mut restored)
        {
            error!(self.log, "Can not restore device. FAILED";
                "dev" => dev,
                "error" => %e);
            return Err(e);
        }
        verify_device_cfg(&self.log, &self.config, &restored, &live)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use asic::tofino_stub::{AsicConfig, StubHandle};

    fn registry(family: TofinoFamily) -> TmRegistry<StubHandle> {
        let log = common::logging::test_logger();
        let hw = StubHandle::new(&log, &AsicConfig::single(0, family, Some(2)))
            .unwrap();
        let config = TmConfig {
            pipes: Some(2),
            ..Default::default()
        };
        TmRegistry::new(&log, hw, config)
    }

    #[test]
    fn test_device_add() {
        let reg = registry(TofinoFamily::Tofino2);
        assert!(matches!(
            reg.device_add(
                TM_NUM_ASIC,
                TofinoFamily::Tofino2,
                WarmInitMode::Cold
            ),
            Err(TmError::InvalidArg(_))
        ));
        assert!(matches!(
            reg.device_add(0, TofinoFamily::Tofino1, WarmInitMode::Cold),
            Err(TmError::InvalidArg(_))
        ));

        reg.device_add(0, TofinoFamily::Tofino2, WarmInitMode::Cold)
            .unwrap();
        assert!(reg.hw().intr_enabled(0).unwrap());
        assert!(matches!(
            reg.device_add(0, TofinoFamily::Tofino2, WarmInitMode::Cold),
            Err(TmError::AlreadyExists(_))
        ));
        assert_eq!(reg.devices(), vec![0]);

        reg.device_remove(0).unwrap();
        assert!(matches!(
            reg.device_remove(0),
            Err(TmError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_ppg_lifecycle() {
        let reg = registry(TofinoFamily::Tofino1);
        reg.device_add(0, TofinoFamily::Tofino1, WarmInitMode::Cold)
            .unwrap();

        let hdl = reg.ppg_create(0, 1, 500, 4).unwrap();
        assert_eq!(reg.ppg_lookup(0, 1, 500).unwrap(), 0);
        assert!(matches!(
            reg.ppg_create(0, 1, 500, 5),
            Err(TmError::AlreadyExists(_))
        ));
        let device = reg.device(0).unwrap();
        assert_eq!(device.ppg_state.counter_get(1, hdl).unwrap(), 500);

        reg.hw().ppg_drop_count_set(0, 1, 0, 17).unwrap();
        assert_eq!(reg.ppg_drop_count(0, 1, 500).unwrap(), 17);

        reg.ppg_delete(0, 1, 500).unwrap();
        assert!(!reg.with_ctx(0, |ctx, _| Ok(ctx.ppg(1, 0)?.in_use)).unwrap());
        assert!(matches!(
            reg.ppg_delete(0, 1, 500),
            Err(TmError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn test_ppg_create_rolls_back() {
        let reg = registry(TofinoFamily::Tofino1);
        reg.device_add(0, TofinoFamily::Tofino1, WarmInitMode::Cold)
            .unwrap();
        // A stale counter entry for the handle the next PPG will get.
        let device = reg.device(0).unwrap();
        device.ppg_state.counter_add(1, 0, 999).unwrap();

        assert!(matches!(
            reg.ppg_create(0, 1, 500, 4),
            Err(TmError::AlreadyExists(_))
        ));
        assert!(matches!(
            reg.ppg_lookup(0, 1, 500),
            Err(TmError::ObjectNotFound(_))
        ));
        assert!(!reg.with_ctx(0, |ctx, _| Ok(ctx.ppg(1, 0)?.in_use)).unwrap());
        assert_eq!(device.ppg_state.counter_get(1, 0).unwrap(), 999);
    }

    #[test]
    fn test_intr_enable_failure_keeps_device() {
        let log = common::logging::test_logger();
        let family = TofinoFamily::Tofino2;
        let stub =
            StubHandle::new(&log, &AsicConfig::single(0, family, Some(2)))
                .unwrap();
        let chaos_config = asic::chaos::AsicConfig {
            intr_enable_set: asic::chaos::Chaos::new(1.0),
            ..Default::default()
        };
        let hw = asic::chaos::Handle::new(&log, &chaos_config, stub);
        let config = TmConfig {
            pipes: Some(2),
            ..Default::default()
        };
        let reg = TmRegistry::new(&log, hw, config);

        assert!(matches!(
            reg.device_add(0, family, WarmInitMode::Cold),
            Err(TmError::Asic(_))
        ));
        assert!(reg.device(0).is_ok());
        assert!(!reg.hw().inner().intr_enabled(0).unwrap());
    }

    #[test]
    fn test_warm_init() {
        let reg = registry(TofinoFamily::Tofino1);
        reg.device_add(0, TofinoFamily::Tofino1, WarmInitMode::Cold)
            .unwrap();
        reg.ppg_create(0, 0, 9, 2).unwrap();
        reg.with_ctx(0, |ctx, hw| ctx.ppg_icos_mapping_set(hw, 0, 0, 0x30))
            .unwrap();

        assert!(matches!(
            reg.warm_init_begin(0, WarmInitMode::Cold),
            Err(TmError::InvalidArg(_))
        ));
        reg.warm_init_begin(0, WarmInitMode::Hitless).unwrap();
        assert!(!reg.hw().intr_enabled(0).unwrap());
        assert!(reg.device(0).is_err());

        reg.device_add(0, TofinoFamily::Tofino1, WarmInitMode::Hitless)
            .unwrap();
        assert!(reg.hw().intr_enabled(0).unwrap());
        // The client's id didn't survive, but the PPG did.
        assert_eq!(reg.ppg_lookup(0, 0, 0).unwrap(), 0);
        assert!(reg.ppg_lookup(0, 0, 9).is_err());
        let mode = reg.with_ctx(0, |ctx, _| Ok(ctx.warm_init_mode)).unwrap();
        assert_eq!(mode, WarmInitMode::Hitless);
    }

    #[test]
    fn test_ut_restore() {
        let reg = registry(TofinoFamily::Tofino3);
        assert!(matches!(
            reg.ut_restore_device_cfg(0),
            Err(TmError::ObjectNotFound(_))
        ));
        reg.device_add(0, TofinoFamily::Tofino3, WarmInitMode::Cold)
            .unwrap();
        let reports = reg.ut_restore_device_cfg(0).unwrap();
        assert_eq!(reports.len(), 6);
        for report in &reports {
            assert!(report.ok(), "{report:?}");
        }
    }
}
