// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! A configuration touching every domain on pipe 0, including values the
//! hardware can only hold approximately.

use aal::{
    DevId, GlobalField, McFifoField, PipeField, PoolField, PortField,
    PpgField, QueueField, TmHwOps,
};
use tm::device::TmRegistry;
use tm::types::{RateKind, TmResult};

pub fn program<H: TmHwOps>(
    registry: &TmRegistry<H>,
    dev: DevId,
) -> TmResult<()> {
    registry.with_ctx(dev, |ctx, hw| {
        ctx.global_set(hw, GlobalField::SkidLimit, 8192)?;
        ctx.ig_pool_set(hw, 1, PoolField::GreenLimit, 20_000)?;
        ctx.ig_pool_pfc_limit_set(hw, 1, 6, 4000)?;
        ctx.eg_pool_set(hw, 2, PoolField::ColorDropEnable, 1)?;
        ctx.pre_fifo_limit_set(hw, 0, 3, 1500)?;

        // Port 0 gets 4 queues and port 1 the 12 after them.
        let slots = ctx.sizing.q_map_slots;
        let four: Vec<u8> = (0..slots).map(|s| s % 4).collect();
        let twelve: Vec<u8> = (0..slots).map(|s| s % 12).collect();
        ctx.port_q_carve(hw, 0, 0, 4, &four)?;
        ctx.port_q_carve(hw, 0, 1, 12, &twelve)?;

        ctx.port_set(hw, 0, 2, PortField::EgLimit, 9000)?;
        // Stored by the hardware as 1000.
        ctx.port_set(hw, 0, 2, PortField::IgLimit, 1003)?;
        ctx.queue_set(hw, 0, 1, 0, QueueField::DwrrWeight, 500)?;
        ctx.queue_set(hw, 0, 1, 3, QueueField::MaxRateEnable, 1)?;
        ctx.queue_rate_set(hw, 0, 1, 3, RateKind::Max, 123_457)?;
        ctx.pipe_set(hw, 0, PipeField::NegMirrorPort, 1)?;
        ctx.pipe_set(hw, 0, PipeField::NegMirrorQueue, 11)?;
        ctx.mc_fifo_set(hw, 0, 1, McFifoField::WrrWeight, 3)?;

        let ppg = ctx.ppg_allocate(hw, 0, 3)?;
        ctx.ppg_icos_mapping_set(hw, 0, ppg, 0b1100_0000)?;
        ctx.ppg_set(hw, 0, ppg, PpgField::GminLimit, 256)?;
        // Not a multiple of 8, so the hardware falls back to its default.
        ctx.ppg_set(hw, 0, ppg, PpgField::Hysteresis, 60)
    })
}
