// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The device context: the driver's in-memory copy of everything programmed
//! into the Traffic Manager of one ASIC.
//!
//! All changes to the configuration go through the setters defined in the
//! submodules.  Each setter validates its arguments, programs the hardware,
//! and only then updates the descriptor.  A context in [`HwMode::ReadOnly`]
//! skips the programming step, which is how the restore path reuses the
//! setters to rebuild a context from values read back out of the hardware.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};

use slog::{debug, Logger};
use strum::IntoEnumIterator;

use aal::{
    DevId, GlobalField, LPort, McFifoField, PipeField, PipeId, PoolField,
    PortField, PpgField, PpgNum, QProfileField, QueueField, TmHwOps, TmReg,
    TmSizing, TofinoFamily,
};

use crate::config::TmConfig;
use crate::types::{TmError, TmResult, WarmInitMode};

mod desc;
mod pipe;
mod pool;
mod port;
mod ppg;
mod queue;

pub use desc::*;

/// Whether the setters may program the hardware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HwMode {
    #[default]
    Live,
    /// Hardware writes are dropped.  Reads still go to the hardware.
    ReadOnly,
}

/// The last step of a restore to have completed on a context.  The domains
/// must be restored in this order, as each builds on those before it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum RestoreStage {
    #[default]
    Idle,
    Started,
    Pools,
    Ppgs,
    QProfiles,
    Ports,
    Queues,
    Pipes,
    McFifos,
}

/// Identifies a PPG's drop counter in the counter cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct CounterHandle {
    pub pipe: PipeId,
    pub port: LPort,
    pub ppg: PpgNum,
}

/// Everything belonging to a single pipe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipeState {
    pub cfg: PipeCfg,
    /// Indexed by PPG number.
    pub ppgs: Vec<PpgDesc>,
    /// Indexed by port.
    pub ports: Vec<PortDesc>,
    /// Indexed by profile id.
    pub profiles: Vec<QProfile>,
    /// Indexed by physical queue number.
    pub queues: Vec<QueueDesc>,
    pub mc_fifos: Vec<McFifo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TmCtx {
    pub dev: DevId,
    pub family: TofinoFamily,
    pub sizing: TmSizing,
    pub sw_inited: bool,
    pub hw_inited: bool,
    pub warm_init_mode: WarmInitMode,
    pub pools: PoolCfg,
    pub pipes: Vec<PipeState>,

    internal_call: bool,
    hw_mode: HwMode,
    stage: RestoreStage,
    q_map_cache: BTreeMap<(PipeId, u8), Vec<u8>>,
    icos_ppg_cache: BTreeMap<(PipeId, LPort, u8), PpgNum>,
    drop_counters: BTreeMap<CounterHandle, u64>,
}

/// Marks a context as being operated on by the driver itself rather than by
/// a client.  The mark is removed when the guard is dropped.
pub struct InternalCall<'a> {
    ctx: &'a mut TmCtx,
}

impl Deref for InternalCall<'_> {
    type Target = TmCtx;

    fn deref(&self) -> &TmCtx {
        self.ctx
    }
}

impl DerefMut for InternalCall<'_> {
    fn deref_mut(&mut self) -> &mut TmCtx {
        self.ctx
    }
}

impl Drop for InternalCall<'_> {
    fn drop(&mut self) {
        self.ctx.internal_call = false;
    }
}

// Seed a descriptor with the hardware's reset values.
fn reset_desc<D, I, R>(family: TofinoFamily, desc: &mut D, fields: I, reg: R)
where
    D: FieldAccess,
    I: Iterator<Item = D::Field>,
    R: Fn(D::Field) -> TmReg,
{
    for field in fields {
        // The reset values are all in range for their fields.
        let _ = desc.apply(field, aal::reset_value(family, reg(field)));
    }
}

impl TmCtx {
    /// Build a context describing a device just out of reset.
    pub fn new(
        dev: DevId,
        family: TofinoFamily,
        config: &TmConfig,
    ) -> TmResult<TmCtx> {
        let mut sizing = TmSizing::for_family(family);
        if let Some(pipes) = config.pipes {
            if pipes == 0 || pipes > sizing.pipes {
                return Err(TmError::InvalidArg(format!(
                    "{family} has {} pipes, not {pipes}",
                    sizing.pipes
                )));
            }
            sizing.pipes = pipes;
        }

        let pools = Self::default_pools(family, &sizing);
        let pipes = (0..sizing.pipes)
            .map(|pipe| Self::default_pipe(family, &sizing, pipe))
            .collect();

        let mut drop_counters = BTreeMap::new();
        for pipe in 0..sizing.pipes {
            for port in 0..sizing.ports_per_pipe {
                let ppg = sizing.default_ppg(port);
                drop_counters.insert(CounterHandle { pipe, port, ppg }, 0);
            }
        }

        Ok(TmCtx {
            dev,
            family,
            sizing,
            sw_inited: true,
            hw_inited: false,
            warm_init_mode: WarmInitMode::Cold,
            pools,
            pipes,
            internal_call: false,
            hw_mode: HwMode::Live,
            stage: RestoreStage::Idle,
            q_map_cache: BTreeMap::new(),
            icos_ppg_cache: BTreeMap::new(),
            drop_counters,
        })
    }

    fn default_pools(family: TofinoFamily, sizing: &TmSizing) -> PoolCfg {
        let mut cfg = PoolCfg::default();
        reset_desc(family, &mut cfg.global, GlobalField::iter(), TmReg::Global);
        for pool in 0..sizing.ig_pools {
            let mut limits = PoolLimits::default();
            reset_desc(family, &mut limits, PoolField::iter(), |field| {
                TmReg::IgPool { pool, field }
            });
            cfg.ig_pools.push(limits);
            cfg.ig_pfc_limits.push(
                (0..sizing.icos_levels)
                    .map(|icos| {
                        aal::reset_value(
                            family,
                            TmReg::IgPoolPfcLimit { pool, icos },
                        )
                    })
                    .collect(),
            );
        }
        for pool in 0..sizing.eg_pools {
            let mut limits = PoolLimits::default();
            reset_desc(family, &mut limits, PoolField::iter(), |field| {
                TmReg::EgPool { pool, field }
            });
            cfg.eg_pools.push(limits);
        }
        for pipe in 0..sizing.pipes {
            cfg.pre_fifo_limits.push(
                (0..sizing.mc_fifos)
                    .map(|fifo| {
                        aal::reset_value(
                            family,
                            TmReg::PreFifoLimit { pipe, fifo },
                        )
                    })
                    .collect(),
            );
        }
        cfg
    }

    fn default_pipe(
        family: TofinoFamily,
        sizing: &TmSizing,
        pipe: PipeId,
    ) -> PipeState {
        let mut state = PipeState::default();
        reset_desc(family, &mut state.cfg, PipeField::iter(), |field| {
            TmReg::Pipe { pipe, field }
        });

        for ppg in 0..sizing.ppgs_per_pipe() {
            let is_default = sizing.is_default_ppg(ppg);
            let mut desc = PpgDesc {
                ppg,
                is_default,
                in_use: is_default,
                port: is_default
                    .then(|| (ppg - sizing.pfc_ppgs_per_pipe) as LPort),
                ..Default::default()
            };
            reset_desc(family, &mut desc, PpgField::iter(), |field| {
                TmReg::Ppg { pipe, ppg, field }
            });
            state.ppgs.push(desc);
        }

        let per_port = sizing.default_queues_per_port();
        for port in 0..sizing.ports_per_pipe {
            let mut desc = PortDesc {
                port,
                pg: sizing.port_group(port),
                default_ppg: sizing.default_ppg(port),
                ppgs: vec![None; sizing.icos_levels.into()],
                ..Default::default()
            };
            reset_desc(family, &mut desc, PortField::iter(), |field| {
                TmReg::Port { pipe, port, field }
            });
            state.ports.push(desc);

            // Each port has a profile of its own.
            let profile = port;
            let mut desc = QProfile {
                q_count: per_port,
                mapping: (0..sizing.q_map_slots)
                    .map(|slot| {
                        aal::reset_value(
                            family,
                            TmReg::QProfileMap {
                                pipe,
                                profile,
                                slot,
                            },
                        ) as u8
                    })
                    .collect(),
                ..Default::default()
            };
            reset_desc(family, &mut desc, QProfileField::iter(), |field| {
                TmReg::QProfile {
                    pipe,
                    profile,
                    field,
                }
            });
            state.profiles.push(desc);
        }

        for queue in 0..sizing.queues_per_pipe() {
            let pg_offset = queue % sizing.queues_per_pg;
            let port = (queue / sizing.queues_per_pg) as u8
                * sizing.ports_per_pg
                + (pg_offset / per_port) as u8;
            let mut desc = QueueDesc {
                port: Some(port),
                index: pg_offset % per_port,
                ..Default::default()
            };
            reset_desc(family, &mut desc, queue_fields(), |field| {
                TmReg::Queue { pipe, queue, field }
            });
            state.queues.push(desc);
        }

        for fifo in 0..sizing.mc_fifos {
            let mut desc = McFifo::default();
            reset_desc(family, &mut desc, McFifoField::iter(), |field| {
                TmReg::McFifo { pipe, fifo, field }
            });
            state.mc_fifos.push(desc);
        }
        state
    }

    pub fn hw_mode(&self) -> HwMode {
        self.hw_mode
    }

    pub(crate) fn set_hw_mode(&mut self, mode: HwMode) {
        self.hw_mode = mode;
    }

    pub fn restore_stage(&self) -> RestoreStage {
        self.stage
    }

    pub(crate) fn set_restore_stage(&mut self, stage: RestoreStage) {
        self.stage = stage;
    }

    pub fn is_internal_call(&self) -> bool {
        self.internal_call
    }

    /// Allow the setters to be used before the hardware has been
    /// initialized, for as long as the returned guard lives.
    pub fn internal_call(&mut self) -> InternalCall<'_> {
        self.internal_call = true;
        InternalCall { ctx: self }
    }

    // Client-facing setters may only be used once the hardware matches the
    // context.
    fn ready(&self) -> TmResult<()> {
        if !self.sw_inited {
            Err(TmError::Uninitialized("device context".to_string()))
        } else if !self.hw_inited && !self.internal_call {
            Err(TmError::Uninitialized("device hardware".to_string()))
        } else {
            Ok(())
        }
    }

    pub(crate) fn hw_write(
        &self,
        hw: &impl TmHwOps,
        reg: TmReg,
        value: u32,
    ) -> TmResult<()> {
        match self.hw_mode {
            HwMode::ReadOnly => Ok(()),
            HwMode::Live => Ok(hw.tm_write(self.dev, reg, value)?),
        }
    }

    pub(crate) fn hw_read(
        &self,
        hw: &impl TmHwOps,
        reg: TmReg,
    ) -> TmResult<u32> {
        Ok(hw.tm_read(self.dev, reg)?.current)
    }

    /// Forget everything cached from the hardware, so the next lookup goes
    /// back to the registers.
    pub fn invalidate_caches(&mut self) {
        self.q_map_cache.clear();
        self.icos_ppg_cache.clear();
    }

    /// The queue mapping table of a profile.
    pub(crate) fn q_mapping(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        profile: u8,
    ) -> TmResult<Vec<u8>> {
        if let Some(mapping) = self.q_map_cache.get(&(pipe, profile)) {
            return Ok(mapping.clone());
        }
        let mut mapping = Vec::with_capacity(self.sizing.q_map_slots.into());
        for slot in 0..self.sizing.q_map_slots {
            let reg = TmReg::QProfileMap {
                pipe,
                profile,
                slot,
            };
            let queue = self.hw_read(hw, reg)?;
            mapping.push(u8::try_from(queue).map_err(|_| {
                TmError::Unexpected(format!("{reg} holds {queue}"))
            })?);
        }
        self.q_map_cache.insert((pipe, profile), mapping.clone());
        Ok(mapping)
    }

    /// The PPG serving traffic on a port with the given icos.
    pub(crate) fn icos_ppg(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        port: LPort,
        icos: u8,
    ) -> TmResult<PpgNum> {
        if let Some(ppg) = self.icos_ppg_cache.get(&(pipe, port, icos)) {
            return Ok(*ppg);
        }
        let reg = TmReg::PortIcosPpg { pipe, port, icos };
        let ppg = self.hw_read(hw, reg)?;
        let ppg = PpgNum::try_from(ppg)
            .ok()
            .filter(|ppg| *ppg < self.sizing.ppgs_per_pipe())
            .ok_or_else(|| {
                TmError::Unexpected(format!("{reg} holds {ppg}"))
            })?;
        self.icos_ppg_cache.insert((pipe, port, icos), ppg);
        Ok(ppg)
    }

    pub fn drop_counter(&self, handle: CounterHandle) -> Option<u64> {
        self.drop_counters.get(&handle).copied()
    }

    pub(crate) fn drop_counter_seed(&mut self, handle: CounterHandle, v: u64) {
        self.drop_counters.insert(handle, v);
    }

    pub(crate) fn drop_counter_remove(&mut self, handle: CounterHandle) {
        self.drop_counters.remove(&handle);
    }

    /// Fetch the current drop count of a PPG from the hardware and update
    /// the cached copy.
    pub fn drop_counter_refresh(
        &mut self,
        hw: &impl TmHwOps,
        handle: CounterHandle,
    ) -> TmResult<u64> {
        if !self.drop_counters.contains_key(&handle) {
            return Err(TmError::ObjectNotFound(format!(
                "drop counter for ppg {} on pipe {}",
                handle.ppg, handle.pipe
            )));
        }
        let count = hw.ppg_drop_count_get(self.dev, handle.pipe, handle.ppg)?;
        self.drop_counters.insert(handle, count);
        Ok(count)
    }

    pub fn pipe(&self, pipe: PipeId) -> TmResult<&PipeState> {
        self.pipes
            .get(usize::from(pipe))
            .ok_or_else(|| TmError::InvalidArg(format!("no such pipe: {pipe}")))
    }

    pub(crate) fn pipe_mut(
        &mut self,
        pipe: PipeId,
    ) -> TmResult<&mut PipeState> {
        self.pipes
            .get_mut(usize::from(pipe))
            .ok_or_else(|| TmError::InvalidArg(format!("no such pipe: {pipe}")))
    }

    pub fn port(&self, pipe: PipeId, port: LPort) -> TmResult<&PortDesc> {
        self.pipe(pipe)?
            .ports
            .get(usize::from(port))
            .ok_or_else(|| TmError::InvalidArg(format!("no such port: {port}")))
    }

    pub fn ppg(&self, pipe: PipeId, ppg: PpgNum) -> TmResult<&PpgDesc> {
        self.pipe(pipe)?
            .ppgs
            .get(usize::from(ppg))
            .ok_or_else(|| TmError::InvalidArg(format!("no such ppg: {ppg}")))
    }

    pub fn q_profile(&self, pipe: PipeId, port: LPort) -> TmResult<&QProfile> {
        let profile = self.port(pipe, port)?.qid_profile;
        self.pipe(pipe)?
            .profiles
            .get(usize::from(profile))
            .ok_or_else(|| {
                TmError::Unexpected(format!(
                    "port {port} uses missing profile {profile}"
                ))
            })
    }

    /// The physical number of a port's queue.
    pub fn queue_num(
        &self,
        pipe: PipeId,
        port: LPort,
        index: u16,
    ) -> TmResult<u16> {
        let profile = self.q_profile(pipe, port)?;
        if index >= profile.q_count {
            return Err(TmError::InvalidArg(format!(
                "port {port} has {} queues, not {}",
                profile.q_count,
                index + 1
            )));
        }
        Ok(self.sizing.pg_base_queue(port) + profile.base_queue + index)
    }

    pub fn queue(
        &self,
        pipe: PipeId,
        port: LPort,
        index: u16,
    ) -> TmResult<&QueueDesc> {
        let queue = self.queue_num(pipe, port, index)?;
        self.pipe(pipe)?
            .queues
            .get(usize::from(queue))
            .ok_or_else(|| TmError::Unexpected(format!("no queue {queue}")))
    }

    /// Program every value held in the context into the hardware.
    pub fn hw_init(&mut self, log: &Logger, hw: &impl TmHwOps) -> TmResult<()> {
        if self.hw_mode != HwMode::Live {
            return Err(TmError::Unexpected(
                "hardware init on a read-only context".to_string(),
            ));
        }

        let mut writes = Vec::new();
        let pools = &self.pools;
        for field in GlobalField::iter() {
            writes.push((TmReg::Global(field), pools.global.value(field)));
        }
        for (pool, limits) in (0..).zip(&pools.ig_pools) {
            for field in PoolField::iter() {
                let reg = TmReg::IgPool { pool, field };
                writes.push((reg, limits.value(field)));
            }
        }
        for (pool, limits) in (0..).zip(&pools.ig_pfc_limits) {
            for (icos, limit) in (0..).zip(limits) {
                writes.push((TmReg::IgPoolPfcLimit { pool, icos }, *limit));
            }
        }
        for (pool, limits) in (0..).zip(&pools.eg_pools) {
            for field in PoolField::iter() {
                let reg = TmReg::EgPool { pool, field };
                writes.push((reg, limits.value(field)));
            }
        }
        for (pipe, limits) in (0..).zip(&pools.pre_fifo_limits) {
            for (fifo, limit) in (0..).zip(limits) {
                writes.push((TmReg::PreFifoLimit { pipe, fifo }, *limit));
            }
        }

        for (pipe, state) in (0..).zip(&self.pipes) {
            Self::pipe_writes(&self.sizing, pipe, state, &mut writes);
        }

        let mut unsupported = 0;
        for (reg, value) in writes {
            match self.hw_write(hw, reg, value) {
                Ok(()) => {}
                Err(TmError::NotSupported) => unsupported += 1,
                Err(e) => return Err(e),
            }
        }
        debug!(log, "initialized tm hardware";
            "dev" => self.dev,
            "unsupported" => unsupported);
        self.hw_inited = true;
        Ok(())
    }

    fn pipe_writes(
        sizing: &TmSizing,
        pipe: PipeId,
        state: &PipeState,
        writes: &mut Vec<(TmReg, u32)>,
    ) {
        for (ppg, desc) in (0..).zip(&state.ppgs) {
            for field in PpgField::iter() {
                let reg = TmReg::Ppg { pipe, ppg, field };
                writes.push((reg, desc.value(field)));
            }
        }
        for (port, desc) in (0..).zip(&state.ports) {
            for (icos, ppg) in (0..).zip(&desc.ppgs) {
                let ppg = ppg.unwrap_or(desc.default_ppg);
                let reg = TmReg::PortIcosPpg { pipe, port, icos };
                writes.push((reg, ppg.into()));
            }
            for field in PortField::iter() {
                let reg = TmReg::Port { pipe, port, field };
                writes.push((reg, desc.value(field)));
            }
        }
        for (profile, desc) in (0..).zip(&state.profiles) {
            // The first port in a group always starts at the group's first
            // queue.
            if sizing.port_channel(profile) != 0 {
                writes.push((
                    TmReg::QProfile {
                        pipe,
                        profile,
                        field: QProfileField::BaseQueue,
                    },
                    desc.base_queue.into(),
                ));
            }
            for (slot, queue) in (0..).zip(&desc.mapping) {
                writes.push((
                    TmReg::QProfileMap {
                        pipe,
                        profile,
                        slot,
                    },
                    (*queue).into(),
                ));
            }
        }
        for (queue, desc) in (0..).zip(&state.queues) {
            for field in QueueField::iter() {
                let reg = TmReg::Queue { pipe, queue, field };
                writes.push((reg, desc.value(field)));
            }
        }
        for field in PipeField::iter() {
            writes.push((TmReg::Pipe { pipe, field }, state.cfg.value(field)));
        }
        for (fifo, desc) in (0..).zip(&state.mc_fifos) {
            for field in McFifoField::iter() {
                let reg = TmReg::McFifo { pipe, fifo, field };
                writes.push((reg, desc.value(field)));
            }
        }
    }
}
