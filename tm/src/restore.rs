// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Rebuild a device context from the configuration live in the hardware.
//!
//! The context being restored is switched into [`HwMode::ReadOnly`], so the
//! ordinary setters can be used to record each value without writing it
//! back.  The domains are restored in a fixed order, as the later ones are
//! interpreted in terms of the earlier: PPGs are found through the port
//! mappings, queues are addressed through their port's queue profile, and
//! so on.  Each step refuses to run until the one before it has completed.
//!
//! The first hard error ends the restore.  The partially restored context
//! is left for the caller to throw away.  A field the hardware reports as
//! unsupported keeps the value it was given when the context was built.

use slog::{debug, error, info, o, Logger};
use strum::IntoEnumIterator;

use aal::{
    GlobalField, McFifoField, PipeField, PipeId, PoolField, PortField,
    QProfileField, RateCode, TmHwOps, TmReg,
};

use crate::ctx::{
    ppg_fields, queue_fields, rate_fields, CounterHandle, HwMode,
    RestoreStage, TmCtx,
};
use crate::types::{RateKind, TmError, TmResult};

// Read a field, treating "not supported" as "nothing to restore".
fn read_field(
    log: &Logger,
    ctx: &TmCtx,
    hw: &impl TmHwOps,
    reg: TmReg,
) -> TmResult<Option<u32>> {
    match ctx.hw_read(hw, reg) {
        Ok(value) => Ok(Some(value)),
        Err(TmError::NotSupported) => {
            debug!(log, "{reg} not supported, keeping default");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// Confirm that a step is being run on a context prepared for restore, and
// that the step before it has completed.
fn check_stage(ctx: &TmCtx, prior: RestoreStage) -> TmResult<()> {
    if ctx.hw_mode() != HwMode::ReadOnly || !ctx.is_internal_call() {
        Err(TmError::Unexpected(
            "context is not being restored".to_string(),
        ))
    } else if ctx.restore_stage() < prior {
        Err(TmError::Unexpected(format!(
            "restore step run before {prior:?} completed (at {:?})",
            ctx.restore_stage()
        )))
    } else {
        Ok(())
    }
}

/// Prepare a context to be restored: hardware writes are disabled and
/// anything cached from the hardware is discarded.
pub fn restore_begin(ctx: &mut TmCtx) {
    ctx.set_hw_mode(HwMode::ReadOnly);
    ctx.invalidate_caches();
    ctx.set_restore_stage(RestoreStage::Started);
}

/// Finish a restore, re-enabling hardware writes.
pub fn restore_end(ctx: &mut TmCtx) {
    ctx.set_hw_mode(HwMode::Live);
    ctx.hw_inited = true;
}

/// Restore the ingress and egress pools, the device-wide limits, and the
/// PRE FIFO limits.
pub fn restore_pools<H: TmHwOps>(
    log: &Logger,
    hw: &H,
    ctx: &mut TmCtx,
) -> TmResult<()> {
    check_stage(ctx, RestoreStage::Started)?;

    for field in GlobalField::iter() {
        if let Some(v) = read_field(log, ctx, hw, TmReg::Global(field))? {
            ctx.global_set(hw, field, v)?;
        }
    }
    for pool in 0..ctx.sizing.ig_pools {
        for field in PoolField::iter() {
            let reg = TmReg::IgPool { pool, field };
            if let Some(v) = read_field(log, ctx, hw, reg)? {
                ctx.ig_pool_set(hw, pool, field, v)?;
            }
        }
        for icos in 0..ctx.sizing.icos_levels {
            let reg = TmReg::IgPoolPfcLimit { pool, icos };
            if let Some(v) = read_field(log, ctx, hw, reg)? {
                ctx.ig_pool_pfc_limit_set(hw, pool, icos, v)?;
            }
        }
    }
    for pool in 0..ctx.sizing.eg_pools {
        for field in PoolField::iter() {
            let reg = TmReg::EgPool { pool, field };
            if let Some(v) = read_field(log, ctx, hw, reg)? {
                ctx.eg_pool_set(hw, pool, field, v)?;
            }
        }
    }
    for pipe in 0..ctx.sizing.pipes {
        for fifo in 0..ctx.sizing.mc_fifos {
            let reg = TmReg::PreFifoLimit { pipe, fifo };
            if let Some(v) = read_field(log, ctx, hw, reg)? {
                ctx.pre_fifo_limit_set(hw, pipe, fifo, v)?;
            }
        }
    }

    ctx.set_restore_stage(RestoreStage::Pools);
    Ok(())
}

fn restore_ppg_fields(
    log: &Logger,
    hw: &impl TmHwOps,
    ctx: &mut TmCtx,
    pipe: PipeId,
    ppg: u16,
) -> TmResult<()> {
    for field in ppg_fields() {
        let reg = TmReg::Ppg { pipe, ppg, field };
        if let Some(v) = read_field(log, ctx, hw, reg)? {
            ctx.ppg_set(hw, pipe, ppg, field, v)?;
        }
    }
    Ok(())
}

/// Restore the PPGs.  The hardware has no record of PPGs that were
/// allocated but never given an icos, so PFC PPGs are discovered by walking
/// each port's icos-to-PPG mapping.
pub fn restore_ppgs<H: TmHwOps>(
    log: &Logger,
    hw: &H,
    ctx: &mut TmCtx,
) -> TmResult<()> {
    check_stage(ctx, RestoreStage::Pools)?;
    let sizing = ctx.sizing;

    for pipe in 0..sizing.pipes {
        for port in 0..sizing.ports_per_pipe {
            let dflt = sizing.default_ppg(port);
            let mut restored = 0u8;
            for icos in 0..sizing.icos_levels {
                let bit = 1u8 << icos;
                if restored & bit != 0 {
                    continue;
                }
                let ppg = ctx.icos_ppg(hw, pipe, port, icos)?;
                if ppg == dflt {
                    continue;
                }
                if sizing.is_default_ppg(ppg) {
                    return Err(TmError::Unexpected(format!(
                        "icos {icos} of port {port} on pipe {pipe} maps to \
                        another port's default ppg {ppg}"
                    )));
                }

                let reg = TmReg::Ppg {
                    pipe,
                    ppg,
                    field: aal::PpgField::IcosMask,
                };
                let mask = ctx.hw_read(hw, reg)?;
                let mask = u8::try_from(mask)
                    .ok()
                    .filter(|mask| mask & bit != 0)
                    .ok_or_else(|| {
                        TmError::Unexpected(format!(
                            "ppg {ppg} serves icos {icos} of port {port}, \
                            but has icos mask {mask:#x}"
                        ))
                    })?;
                debug!(log, "found ppg {ppg}";
                    "pipe" => pipe,
                    "port" => port,
                    "icos_mask" => mask);

                ctx.ppg_bind(pipe, ppg, port)?;
                // An allocated PPG gets a drop counter, and a restored one
                // must too.
                let drops = hw.ppg_drop_count_get(ctx.dev, pipe, ppg)?;
                ctx.drop_counter_seed(CounterHandle { pipe, port, ppg }, drops);
                restored |= mask;
                ctx.ppg_icos_mapping_set(hw, pipe, ppg, mask)?;
                restore_ppg_fields(log, hw, ctx, pipe, ppg)?;
            }

            // Everything not claimed by a PFC PPG lands in the default PPG.
            if ctx.ppg(pipe, dflt)?.icos_mask != !restored {
                return Err(TmError::Unexpected(format!(
                    "default ppg {dflt} of port {port} has the wrong icos"
                )));
            }
            restore_ppg_fields(log, hw, ctx, pipe, dflt)?;

            // Default PPGs are never allocated, so their counters are seeded
            // here.
            let drops = hw.ppg_drop_count_get(ctx.dev, pipe, dflt)?;
            let handle = CounterHandle {
                pipe,
                port,
                ppg: dflt,
            };
            ctx.drop_counter_seed(handle, drops);
        }
    }

    ctx.set_restore_stage(RestoreStage::Ppgs);
    Ok(())
}

/// Restore the queue profiles.
pub fn restore_q_profiles<H: TmHwOps>(
    log: &Logger,
    hw: &H,
    ctx: &mut TmCtx,
) -> TmResult<()> {
    check_stage(ctx, RestoreStage::Ppgs)?;
    let sizing = ctx.sizing;

    for pipe in 0..sizing.pipes {
        for profile in 0..sizing.ports_per_pipe {
            let mapping = ctx.q_mapping(hw, pipe, profile)?;
            let base = if sizing.port_channel(profile) == 0 {
                0
            } else {
                let reg = TmReg::QProfile {
                    pipe,
                    profile,
                    field: QProfileField::BaseQueue,
                };
                let base = ctx.hw_read(hw, reg)?;
                u16::try_from(base)
                    .ok()
                    .filter(|base| *base < sizing.queues_per_pg)
                    .ok_or_else(|| {
                        TmError::Unexpected(format!("{reg} holds {base}"))
                    })?
            };

            // The queue count isn't stored anywhere.  It is taken to be the
            // span of the queues in the mapping, which assumes that both the
            // first and the last of the port's queues are mapped.
            let lo = mapping.iter().min().copied().unwrap_or(0);
            let hi = mapping.iter().max().copied().unwrap_or(0);
            let q_count = u16::from(hi - lo) + 1;
            debug!(log, "restored queue profile {profile}";
                "pipe" => pipe,
                "base" => base,
                "q_count" => q_count);

            ctx.q_profile_set(hw, pipe, profile, base, q_count, mapping)?;
        }
    }

    ctx.set_restore_stage(RestoreStage::QProfiles);
    Ok(())
}

/// Restore the ports, and with them the assignment of queues to ports.
pub fn restore_ports<H: TmHwOps>(
    log: &Logger,
    hw: &H,
    ctx: &mut TmCtx,
) -> TmResult<()> {
    check_stage(ctx, RestoreStage::QProfiles)?;
    let sizing = ctx.sizing;

    for pipe in 0..sizing.pipes {
        for port in 0..sizing.ports_per_pipe {
            for field in PortField::iter() {
                let reg = TmReg::Port { pipe, port, field };
                if let Some(v) = read_field(log, ctx, hw, reg)? {
                    ctx.port_set(hw, pipe, port, field, v)?;
                }
            }
        }

        // The queues are handed out again from scratch, as the layout in
        // the hardware may differ from the default one.
        for port in 0..sizing.ports_per_pipe {
            ctx.port_queues_release(pipe, port)?;
        }
        for port in 0..sizing.ports_per_pipe {
            let profile = ctx.q_profile(pipe, port)?;
            let end =
                u32::from(profile.base_queue) + u32::from(profile.q_count);
            if end > u32::from(sizing.queues_per_pg) {
                return Err(TmError::Unexpected(format!(
                    "port {port} on pipe {pipe} has queue base {} and count \
                    {}, but its group only has {} queues",
                    profile.base_queue, profile.q_count, sizing.queues_per_pg
                )));
            }
            ctx.port_queues_assign(pipe, port)?;
        }
    }

    ctx.set_restore_stage(RestoreStage::Ports);
    Ok(())
}

/// Restore the queues.  Only queues assigned to a port are read, each
/// through its port's profile.
pub fn restore_queues<H: TmHwOps>(
    log: &Logger,
    hw: &H,
    ctx: &mut TmCtx,
) -> TmResult<()> {
    check_stage(ctx, RestoreStage::Ports)?;
    let sizing = ctx.sizing;

    for pipe in 0..sizing.pipes {
        for port in 0..sizing.ports_per_pipe {
            let q_count = ctx.q_profile(pipe, port)?.q_count;
            for index in 0..q_count {
                let queue = ctx.queue_num(pipe, port, index)?;
                for field in queue_fields() {
                    let reg = TmReg::Queue { pipe, queue, field };
                    if let Some(v) = read_field(log, ctx, hw, reg)? {
                        ctx.queue_set(hw, pipe, port, index, field, v)?;
                    }
                }
                for kind in RateKind::iter() {
                    let (mant, exp) = rate_fields(kind);
                    let mant = TmReg::Queue {
                        pipe,
                        queue,
                        field: mant,
                    };
                    let exp = TmReg::Queue {
                        pipe,
                        queue,
                        field: exp,
                    };
                    let (Some(mantissa), Some(exponent)) = (
                        read_field(log, ctx, hw, mant)?,
                        read_field(log, ctx, hw, exp)?,
                    ) else {
                        continue;
                    };
                    let kbps = RateCode { mantissa, exponent }.rate();
                    ctx.queue_rate_set(hw, pipe, port, index, kind, kbps)?;
                }
            }
        }
    }

    ctx.set_restore_stage(RestoreStage::Queues);
    Ok(())
}

/// Restore the per-pipe settings.  The negative mirror destination must be
/// a queue that exists.
pub fn restore_pipes<H: TmHwOps>(
    log: &Logger,
    hw: &H,
    ctx: &mut TmCtx,
) -> TmResult<()> {
    check_stage(ctx, RestoreStage::Queues)?;

    for pipe in 0..ctx.sizing.pipes {
        for field in PipeField::iter() {
            let reg = TmReg::Pipe { pipe, field };
            if let Some(v) = read_field(log, ctx, hw, reg)? {
                ctx.pipe_set(hw, pipe, field, v)?;
            }
        }

        let cfg = &ctx.pipe(pipe)?.cfg;
        let (port, queue) = (cfg.neg_mirror_port, cfg.neg_mirror_queue);
        let q_count = ctx.q_profile(pipe, port)?.q_count;
        if u16::from(queue) >= q_count {
            return Err(TmError::Unexpected(format!(
                "negative mirror queue {queue} on pipe {pipe}, but port \
                {port} only has {q_count} queues"
            )));
        }
    }

    ctx.set_restore_stage(RestoreStage::Pipes);
    Ok(())
}

/// Restore the multicast FIFOs.
pub fn restore_mc_fifos<H: TmHwOps>(
    log: &Logger,
    hw: &H,
    ctx: &mut TmCtx,
) -> TmResult<()> {
    check_stage(ctx, RestoreStage::Pipes)?;

    for pipe in 0..ctx.sizing.pipes {
        for fifo in 0..ctx.sizing.mc_fifos {
            for field in McFifoField::iter() {
                let reg = TmReg::McFifo { pipe, fifo, field };
                if let Some(v) = read_field(log, ctx, hw, reg)? {
                    ctx.mc_fifo_set(hw, pipe, fifo, field, v)?;
                }
            }
        }
    }

    ctx.set_restore_stage(RestoreStage::McFifos);
    Ok(())
}

type RestoreStep<H> = fn(&Logger, &H, &mut TmCtx) -> TmResult<()>;

/// Restore the full configuration of a device into `ctx`, which should be
/// freshly built for the same device.
pub fn restore_device_cfg<H: TmHwOps>(
    log: &Logger,
    hw: &H,
    ctx: &mut TmCtx,
) -> TmResult<()> {
    let log = log.new(o!("unit" => "restore", "dev" => ctx.dev));
    let steps: [(&str, RestoreStep<H>); 7] = [
        ("pools", restore_pools),
        ("ppgs", restore_ppgs),
        ("queue profiles", restore_q_profiles),
        ("ports", restore_ports),
        ("queues", restore_queues),
        ("pipes", restore_pipes),
        ("multicast fifos", restore_mc_fifos),
    ];

    info!(log, "restoring tm configuration"; "family" => %ctx.family);
    let mut ctx = ctx.internal_call();
    restore_begin(&mut ctx);
    for (domain, step) in steps {
        if let Err(e) = step(&log, hw, &mut ctx) {
            error!(log, "failed to restore {domain}"; "error" => %e);
            return Err(e);
        }
        debug!(log, "restored {domain}");
    }
    restore_end(&mut ctx);
    info!(log, "restored tm configuration");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TmConfig;
    use asic::tofino_stub::{AsicConfig, StubHandle};
    use aal::{TmDomain, TofinoFamily};

    fn setup() -> (Logger, StubHandle, TmCtx) {
        let log = common::logging::test_logger();
        let family = TofinoFamily::Tofino1;
        let hw =
            StubHandle::new(&log, &AsicConfig::single(0, family, Some(1)))
                .unwrap();
        let config = TmConfig {
            pipes: Some(1),
            ..Default::default()
        };
        let ctx = TmCtx::new(0, family, &config).unwrap();
        (log, hw, ctx)
    }

    #[test]
    fn test_requires_restore_mode() {
        let (log, hw, mut ctx) = setup();
        assert!(matches!(
            restore_pools(&log, &hw, &mut ctx),
            Err(TmError::Unexpected(_))
        ));
        assert_eq!(hw.read_count(TmDomain::Global), 0);
    }

    #[test]
    fn test_out_of_order() {
        let (log, hw, mut ctx) = setup();
        let mut ctx = ctx.internal_call();
        restore_begin(&mut ctx);
        assert!(matches!(
            restore_ports(&log, &hw, &mut ctx),
            Err(TmError::Unexpected(_))
        ));
        assert_eq!(hw.read_count(TmDomain::Port), 0);

        restore_pools(&log, &hw, &mut ctx).unwrap();
        assert!(matches!(
            restore_q_profiles(&log, &hw, &mut ctx),
            Err(TmError::Unexpected(_))
        ));
        restore_ppgs(&log, &hw, &mut ctx).unwrap();
        restore_q_profiles(&log, &hw, &mut ctx).unwrap();
        assert_eq!(ctx.restore_stage(), RestoreStage::QProfiles);
    }

    #[test]
    fn test_restore_is_read_only() {
        let (log, hw, mut ctx) = setup();
        restore_device_cfg(&log, &hw, &mut ctx).unwrap();
        for domain in TmDomain::iter() {
            assert_eq!(hw.write_count(domain), 0, "{domain:?}");
        }
        assert!(hw.read_count(TmDomain::Queue) > 0);
        assert_eq!(ctx.hw_mode(), HwMode::Live);
        assert!(!ctx.is_internal_call());
        assert!(ctx.hw_inited);
    }

    #[test]
    fn test_untouched_device() {
        let (log, hw, ctx) = setup();
        let mut restored = ctx.clone();
        restore_device_cfg(&log, &hw, &mut restored).unwrap();
        pretty_assertions::assert_eq!(ctx.pools, restored.pools);
        pretty_assertions::assert_eq!(ctx.pipes, restored.pipes);
    }
}
