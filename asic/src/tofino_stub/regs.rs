// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::{AsicError, AsicResult, PipeId, TmReg, TmSizing};

fn check(
    what: &str,
    idx: impl Into<u32>,
    limit: impl Into<u32>,
) -> AsicResult<()> {
    let (idx, limit) = (idx.into(), limit.into());
    if idx < limit {
        Ok(())
    } else {
        Err(AsicError::InvalidArg(format!(
            "{what} {idx} out of range (max {})",
            limit.saturating_sub(1)
        )))
    }
}

fn check_pipe(sizing: &TmSizing, pipe: PipeId) -> AsicResult<()> {
    check("pipe", pipe, sizing.pipes)
}

/// Confirm that a register names a location that exists on this device.
pub(super) fn validate(sizing: &TmSizing, reg: &TmReg) -> AsicResult<()> {
    match *reg {
        TmReg::Global(_) => Ok(()),
        TmReg::IgPool { pool, .. } => {
            check("ingress pool", pool, sizing.ig_pools)
        }
        TmReg::IgPoolPfcLimit { pool, icos } => {
            check("ingress pool", pool, sizing.ig_pools)?;
            check("icos", icos, sizing.icos_levels)
        }
        TmReg::EgPool { pool, .. } => {
            check("egress pool", pool, sizing.eg_pools)
        }
        TmReg::PreFifoLimit { pipe, fifo } => {
            check_pipe(sizing, pipe)?;
            check("pre fifo", fifo, sizing.mc_fifos)
        }
        TmReg::Ppg { pipe, ppg, .. } => {
            check_pipe(sizing, pipe)?;
            check("ppg", ppg, sizing.ppgs_per_pipe())
        }
        TmReg::PortIcosPpg { pipe, port, icos } => {
            check_pipe(sizing, pipe)?;
            check("port", port, sizing.ports_per_pipe)?;
            check("icos", icos, sizing.icos_levels)
        }
        TmReg::QProfile { pipe, profile, .. } => {
            check_pipe(sizing, pipe)?;
            check("queue profile", profile, sizing.ports_per_pipe)
        }
        TmReg::QProfileMap {
            pipe,
            profile,
            slot,
        } => {
            check_pipe(sizing, pipe)?;
            check("queue profile", profile, sizing.ports_per_pipe)?;
            check("queue map slot", slot, sizing.q_map_slots)
        }
        TmReg::Port { pipe, port, .. } => {
            check_pipe(sizing, pipe)?;
            check("port", port, sizing.ports_per_pipe)
        }
        TmReg::Queue { pipe, queue, .. } => {
            check_pipe(sizing, pipe)?;
            check("queue", queue, sizing.queues_per_pipe())
        }
        TmReg::Pipe { pipe, .. } => check_pipe(sizing, pipe),
        TmReg::McFifo { pipe, fifo, .. } => {
            check_pipe(sizing, pipe)?;
            check("mc fifo", fifo, sizing.mc_fifos)
        }
    }
}

#[test]
fn test_validate() {
    let sizing = TmSizing::for_family(aal::TofinoFamily::Tofino1);
    let ok = TmReg::Queue {
        pipe: 3,
        queue: 575,
        field: aal::QueueField::MinLimit,
    };
    assert!(validate(&sizing, &ok).is_ok());

    let bad = TmReg::Queue {
        pipe: 3,
        queue: 576,
        field: aal::QueueField::MinLimit,
    };
    match validate(&sizing, &bad) {
        Err(AsicError::InvalidArg(msg)) => {
            assert_eq!(msg, "queue 576 out of range (max 575)")
        }
        x => panic!("expected InvalidArg, got {x:?}"),
    }
}
