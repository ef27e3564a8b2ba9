// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Restore and verify a device against the stub ASIC, with and without
//! injected faults.

use pretty_assertions::assert_eq;
use slog::Logger;

use aal::{
    GlobalField, McFifoField, PipeField, PoolField, PortField, PpgField,
    QProfileField, TmDomain, TmHwOps, TmReg, TofinoFamily,
};
use asic::chaos::{self, FaultKind, RegFault, RegMatch};
use asic::tofino_stub::{AsicConfig, StubHandle};
use tm::config::TmConfig;
use tm::ctx::{CounterHandle, TmCtx};
use tm::device::TmRegistry;
use tm::restore::{
    restore_begin, restore_device_cfg, restore_pools, restore_ports,
    restore_ppgs, restore_q_profiles, restore_queues,
};
use tm::types::{RateKind, TmError, WarmInitMode};
use tm::verify::{verify_device_cfg, VerifyDomain, VerifyField};

type ChaosStub = chaos::Handle<StubHandle>;

fn config(pipes: u8) -> TmConfig {
    TmConfig {
        pipes: Some(pipes),
        ..Default::default()
    }
}

fn stub(log: &Logger, family: TofinoFamily, pipes: u8) -> StubHandle {
    StubHandle::new(log, &AsicConfig::single(0, family, Some(pipes))).unwrap()
}

fn registry(family: TofinoFamily, pipes: u8) -> TmRegistry<StubHandle> {
    let log = common::logging::test_logger();
    let reg = TmRegistry::new(&log, stub(&log, family, pipes), config(pipes));
    reg.device_add(0, family, WarmInitMode::Cold).unwrap();
    reg
}

fn chaos_registry(family: TofinoFamily, pipes: u8) -> TmRegistry<ChaosStub> {
    let log = common::logging::test_logger();
    let hw = chaos::Handle::new(
        &log,
        &chaos::AsicConfig::default(),
        stub(&log, family, pipes),
    );
    let reg = TmRegistry::new(&log, hw, config(pipes));
    reg.device_add(0, family, WarmInitMode::Cold).unwrap();
    reg
}

// Program a little of everything on pipe 0 of a Tofino2.
fn configure_sample<H: TmHwOps>(reg: &TmRegistry<H>) {
    reg.with_ctx(0, |ctx, hw| {
        ctx.global_set(hw, GlobalField::SkidLimit, 8192)?;
        ctx.ig_pool_set(hw, 1, PoolField::GreenLimit, 20_000)?;
        ctx.eg_pool_set(hw, 2, PoolField::ColorDropEnable, 1)?;
        ctx.pre_fifo_limit_set(hw, 0, 3, 1500)?;

        let four: Vec<u8> = (0..16).map(|s| s % 4).collect();
        let twelve: Vec<u8> = (0..16).map(|s| s % 12).collect();
        ctx.port_q_carve(hw, 0, 0, 4, &four)?;
        ctx.port_q_carve(hw, 0, 1, 12, &twelve)?;

        ctx.port_set(hw, 0, 2, PortField::EgLimit, 9000)?;
        ctx.port_set(hw, 0, 2, PortField::IgLimit, 1003)?;
        ctx.port_set(hw, 0, 2, PortField::IgHysteresis, 48)?;
        ctx.queue_set(hw, 0, 1, 0, aal::QueueField::DwrrWeight, 500)?;
        ctx.queue_rate_set(hw, 0, 1, 3, RateKind::Max, 123_457)?;
        ctx.pipe_set(hw, 0, PipeField::NegMirrorPort, 1)?;
        ctx.pipe_set(hw, 0, PipeField::NegMirrorQueue, 11)?;
        ctx.mc_fifo_set(hw, 0, 1, McFifoField::WrrWeight, 3)?;

        let ppg = ctx.ppg_allocate(hw, 0, 3)?;
        ctx.ppg_icos_mapping_set(hw, 0, ppg, 0b1100_0000)?;
        ctx.ppg_set(hw, 0, ppg, PpgField::GminLimit, 256)?;
        Ok(())
    })
    .unwrap();
}

fn restore<H: TmHwOps>(reg: &TmRegistry<H>) -> TmCtx {
    let log = common::logging::test_logger();
    let family = reg.hw().asic_family(0).unwrap();
    let mut ctx = TmCtx::new(0, family, reg.config()).unwrap();
    restore_device_cfg(&log, reg.hw(), &mut ctx).unwrap();
    ctx
}

#[test]
fn test_sample_verifies() {
    let reg = registry(TofinoFamily::Tofino2, 1);
    configure_sample(&reg);
    let reports = reg.ut_restore_device_cfg(0).unwrap();
    let domains: Vec<VerifyDomain> = reports.iter().map(|r| r.domain).collect();
    assert_eq!(
        domains,
        vec![
            VerifyDomain::Ppg,
            VerifyDomain::QProfile,
            VerifyDomain::Port,
            VerifyDomain::Queue,
            VerifyDomain::Pipe,
            VerifyDomain::McFifo,
        ]
    );
    for report in &reports {
        assert!(report.ok(), "{report:?}");
        assert!(report.checked > 0);
    }

    let restored = restore(&reg);
    assert_eq!(restored.q_profile(0, 1).unwrap().base_queue, 4);
    assert_eq!(restored.q_profile(0, 1).unwrap().q_count, 12);
    assert_eq!(restored.port(0, 2).unwrap().ig_limit, 1000);
    assert_eq!(restored.pools.ig_pools[1].green, 20_000);
}

#[test]
fn test_restore_idempotent() {
    let reg = registry(TofinoFamily::Tofino2, 1);
    configure_sample(&reg);
    reg.hw().reset_counts();
    let first = restore(&reg);
    let second = restore(&reg);
    assert_eq!(first, second);
    for domain in [TmDomain::Ppg, TmDomain::Port, TmDomain::Queue] {
        assert_eq!(reg.hw().write_count(domain), 0);
    }
}

#[test]
fn test_queue_profile_out_of_range() {
    let log = common::logging::test_logger();
    let reg = registry(TofinoFamily::Tofino1, 1);
    let base = TmReg::QProfile {
        pipe: 0,
        profile: 1,
        field: QProfileField::BaseQueue,
    };
    // Profile 1 has 8 queues, which won't fit after queue 30 of 32.
    reg.hw().tm_write(0, base, 30).unwrap();

    let mut ctx = TmCtx::new(0, TofinoFamily::Tofino1, reg.config()).unwrap();
    let mut ctx = ctx.internal_call();
    restore_begin(&mut ctx);
    restore_pools(&log, reg.hw(), &mut ctx).unwrap();
    restore_ppgs(&log, reg.hw(), &mut ctx).unwrap();
    restore_q_profiles(&log, reg.hw(), &mut ctx).unwrap();
    assert!(matches!(
        restore_ports(&log, reg.hw(), &mut ctx),
        Err(TmError::Unexpected(_))
    ));
    // Nothing after the failed step may run.
    assert!(matches!(
        restore_queues(&log, reg.hw(), &mut ctx),
        Err(TmError::Unexpected(_))
    ));

    assert!(matches!(
        reg.ut_restore_device_cfg(0),
        Err(TmError::Unexpected(_))
    ));
}

#[test]
fn test_queue_base_overflow() {
    let reg = registry(TofinoFamily::Tofino1, 1);
    let base = TmReg::QProfile {
        pipe: 0,
        profile: 1,
        field: QProfileField::BaseQueue,
    };
    reg.hw().tm_write(0, base, u32::from(u16::MAX)).unwrap();
    assert!(matches!(
        reg.ut_restore_device_cfg(0),
        Err(TmError::Unexpected(_))
    ));

    // A hitless restart can't use the hardware state, so it cold boots.
    reg.warm_init_begin(0, WarmInitMode::Hitless).unwrap();
    reg.device_add(0, TofinoFamily::Tofino1, WarmInitMode::Hitless)
        .unwrap();
    let restored = reg
        .with_ctx(0, |ctx, _| Ok(ctx.q_profile(0, 1)?.base_queue))
        .unwrap();
    assert_eq!(restored, 8);
    let reports = reg.ut_restore_device_cfg(0).unwrap();
    assert!(reports.iter().all(|r| r.ok()), "{reports:?}");
}

#[test]
fn test_not_supported_is_skipped() {
    let reg = chaos_registry(TofinoFamily::Tofino1, 1);
    reg.hw().inject(RegFault::new(
        RegMatch::Exact(TmReg::Global(GlobalField::CellLimit)),
        FaultKind::NotSupported,
    ));
    reg.hw().inner().reset_counts();

    let reports = reg.ut_restore_device_cfg(0).unwrap();
    assert!(reports.iter().all(|r| r.ok()));
    assert!(reg.hw().inner().read_count(TmDomain::Ppg) > 0);

    let restored = restore(&reg);
    let cell_limit = aal::reset_value(
        TofinoFamily::Tofino1,
        TmReg::Global(GlobalField::CellLimit),
    );
    assert_eq!(restored.pools.global.cell_limit, cell_limit);
}

#[test]
fn test_hard_error_stops_restore() {
    let reg = chaos_registry(TofinoFamily::Tofino1, 1);
    reg.hw().inject(RegFault::new(
        RegMatch::Domain(TmDomain::IgPool),
        FaultKind::InvalidArg,
    ));
    reg.hw().inner().reset_counts();

    assert!(matches!(
        reg.ut_restore_device_cfg(0),
        Err(TmError::InvalidArg(_))
    ));
    let hw = reg.hw().inner();
    assert!(hw.read_count(TmDomain::Global) > 0);
    for domain in [TmDomain::Ppg, TmDomain::QProfile, TmDomain::Port] {
        assert_eq!(hw.read_count(domain), 0, "{domain:?}");
    }
}

#[test]
fn test_pfc_ppg() {
    let log = common::logging::test_logger();
    let family = TofinoFamily::Tofino1;
    let reg = registry(family, 2);
    for id in 100..104 {
        reg.ppg_create(0, 1, id, 8).unwrap();
    }
    let ppg = reg.ppg_lookup(0, 1, 103).unwrap();
    assert_eq!(ppg, 3);
    reg.with_ctx(0, |ctx, hw| {
        ctx.ppg_icos_mapping_set(hw, 1, ppg, 0b100)?;
        ctx.ppg_set(hw, 1, ppg, PpgField::GminLimit, 512)?;
        ctx.ppg_set(hw, 1, ppg, PpgField::Hysteresis, 60)
    })
    .unwrap();

    let restored = restore(&reg);
    let desc = restored.ppg(1, 3).unwrap();
    assert!(desc.in_use);
    assert_eq!(desc.port, Some(8));
    assert_eq!(desc.icos_mask, 0b100);
    assert_eq!(desc.gmin_limit, 512);
    // The hardware couldn't hold 60, so it fell back to its default.
    assert_eq!(desc.hysteresis, 64);
    let dflt = restored.sizing.default_ppg(8);
    assert_eq!(restored.ppg(1, dflt).unwrap().icos_mask, !0b100);
    assert_eq!(restored.port(1, 8).unwrap().ppgs[2], Some(3));

    let reports = reg
        .with_ctx(0, |live, _| {
            verify_device_cfg(&log, reg.config(), &restored, live)
        })
        .unwrap();
    let ppgs = &reports[0];
    assert_eq!(ppgs.domain, VerifyDomain::Ppg);
    assert!(ppgs.ok(), "{ppgs:?}");
    // PPGs 0-2 were never given an icos, so left no trace in the hardware.
    assert_eq!(
        ppgs.skipped_instances,
        vec!["pipe1.ppg0", "pipe1.ppg1", "pipe1.ppg2"]
    );
}

#[test]
fn test_hitless_restart() {
    let family = TofinoFamily::Tofino1;
    let reg = registry(family, 2);
    reg.ppg_create(0, 1, 7, 8).unwrap();
    reg.with_ctx(0, |ctx, hw| ctx.ppg_icos_mapping_set(hw, 1, 0, 0x03))
        .unwrap();
    let dflt = reg.with_ctx(0, |ctx, _| Ok(ctx.sizing.default_ppg(8))).unwrap();
    reg.hw().ppg_drop_count_set(0, 1, dflt, 42).unwrap();
    reg.hw().ppg_drop_count_set(0, 1, 0, 5).unwrap();

    reg.warm_init_begin(0, WarmInitMode::Hitless).unwrap();
    reg.hw().reset_counts();
    reg.device_add(0, family, WarmInitMode::Hitless).unwrap();

    assert!(reg.hw().intr_enabled(0).unwrap());
    assert_eq!(reg.hw().write_count(TmDomain::Ppg), 0);
    let handle = CounterHandle {
        pipe: 1,
        port: 8,
        ppg: dflt,
    };
    let count = reg.with_ctx(0, |ctx, _| Ok(ctx.drop_counter(handle))).unwrap();
    assert_eq!(count, Some(42));
    assert_eq!(reg.ppg_lookup(0, 1, 0).unwrap(), 0);
    assert_eq!(reg.ppg_drop_count(0, 1, 0).unwrap(), 5);

    // The restored device is fully usable.
    reg.ppg_delete(0, 1, 0).unwrap();
    let port = reg.with_ctx(0, |ctx, _| Ok(ctx.port(1, 8)?.clone())).unwrap();
    assert!(port.ppgs.iter().all(|ppg| ppg.is_none()));
}

#[test]
fn test_hitless_falls_back_to_cold() {
    let family = TofinoFamily::Tofino1;
    let reg = registry(family, 1);
    let base = TmReg::QProfile {
        pipe: 0,
        profile: 1,
        field: QProfileField::BaseQueue,
    };
    reg.hw().tm_write(0, base, 30).unwrap();

    reg.warm_init_begin(0, WarmInitMode::Hitless).unwrap();
    reg.device_add(0, family, WarmInitMode::Hitless).unwrap();

    // The cold boot reprograms the default layout.
    assert_eq!(reg.hw().tm_read(0, base).unwrap().current, 8);
    let mode = reg.with_ctx(0, |ctx, _| Ok(ctx.warm_init_mode)).unwrap();
    assert_eq!(mode, WarmInitMode::Hitless);
    assert!(reg.ut_restore_device_cfg(0).unwrap().iter().all(|r| r.ok()));
}

#[test]
fn test_neg_mirror_queue_survives_hitless() {
    let family = TofinoFamily::Tofino2;
    let reg = registry(family, 1);
    let four: Vec<u8> = (0..16).map(|s| s % 4).collect();
    reg.with_ctx(0, |ctx, hw| {
        ctx.pipe_set(hw, 0, PipeField::NegMirrorPort, 0)?;
        ctx.pipe_set(hw, 0, PipeField::NegMirrorQueue, 10)
    })
    .unwrap();

    // Neither the queue nor the port's carving may leave the mirror
    // destination without a queue.
    assert!(matches!(
        reg.with_ctx(0, |ctx, hw| ctx.port_q_carve(hw, 0, 0, 4, &four)),
        Err(TmError::InvalidArg(_))
    ));
    assert!(matches!(
        reg.with_ctx(0, |ctx, hw| {
            ctx.pipe_set(hw, 0, PipeField::NegMirrorQueue, 16)
        }),
        Err(TmError::InvalidArg(_))
    ));
    assert!(reg.ut_restore_device_cfg(0).unwrap().iter().all(|r| r.ok()));

    reg.warm_init_begin(0, WarmInitMode::Hitless).unwrap();
    reg.device_add(0, family, WarmInitMode::Hitless).unwrap();
    let (queue, q_count) = reg
        .with_ctx(0, |ctx, _| {
            let queue = ctx.pipe(0)?.cfg.neg_mirror_queue;
            Ok((queue, ctx.q_profile(0, 0)?.q_count))
        })
        .unwrap();
    assert_eq!((queue, q_count), (10, 16));
}

#[test]
fn test_rate_tolerance() {
    let log = common::logging::test_logger();
    let reg = registry(TofinoFamily::Tofino3, 1);
    let rate = 100_000_003;
    reg.with_ctx(0, |ctx, hw| {
        ctx.queue_rate_set(hw, 0, 5, 2, RateKind::Min, rate)
    })
    .unwrap();

    let restored = restore(&reg);
    let restored_rate = restored.queue(0, 5, 2).unwrap().min_rate;
    assert!(restored_rate < rate);

    let reports = reg
        .with_ctx(0, |live, _| {
            verify_device_cfg(&log, reg.config(), &restored, live)
        })
        .unwrap();
    assert!(reports.iter().all(|r| r.ok()));

    let exact = TmConfig {
        rate_tolerance_pct: 0,
        ..config(1)
    };
    let reports = reg
        .with_ctx(0, |live, _| verify_device_cfg(&log, &exact, &restored, live))
        .unwrap();
    let queues = &reports[3];
    assert_eq!(queues.domain, VerifyDomain::Queue);
    assert_eq!(queues.failures.len(), 1);
    assert_eq!(
        queues.failures[0].field,
        VerifyField::QueueRate(RateKind::Min)
    );
    assert_eq!(queues.failures[0].location, "pipe0.port5.queue2");
}

#[test]
fn test_unverifiable_fields_are_skipped() {
    let log = common::logging::test_logger();
    let reg = registry(TofinoFamily::Tofino2, 1);
    reg.with_ctx(0, |ctx, hw| {
        ctx.pipe_set(hw, 0, PipeField::TimestampShift, 3)?;
        ctx.mc_fifo_set(hw, 0, 0, McFifoField::Depth, 2000)
    })
    .unwrap();

    let restored = restore(&reg);
    let reports = reg
        .with_ctx(0, |live, _| {
            verify_device_cfg(&log, reg.config(), &restored, live)
        })
        .unwrap();
    assert!(reports.iter().all(|r| r.ok()));
    let pipes = &reports[4];
    assert_eq!(pipes.skipped.len(), 1);
    assert_eq!(
        pipes.skipped[0].field,
        VerifyField::Pipe(PipeField::TimestampShift)
    );
    assert_eq!(reports[5].skipped.len(), 1);
}
