// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::{GlobalField, PipeId, PoolField, TmHwOps, TmReg};

use super::{FieldAccess, TmCtx};
use crate::types::{TmError, TmResult};

impl TmCtx {
    pub fn global_set(
        &mut self,
        hw: &impl TmHwOps,
        field: GlobalField,
        value: u32,
    ) -> TmResult<()> {
        self.ready()?;
        let mut global = self.pools.global.clone();
        global.apply(field, value)?;
        self.hw_write(hw, TmReg::Global(field), value)?;
        self.pools.global = global;
        Ok(())
    }

    pub fn ig_pool_set(
        &mut self,
        hw: &impl TmHwOps,
        pool: u8,
        field: PoolField,
        value: u32,
    ) -> TmResult<()> {
        self.ready()?;
        let mut limits = self
            .pools
            .ig_pools
            .get(usize::from(pool))
            .cloned()
            .ok_or_else(|| {
                TmError::InvalidArg(format!("no such ingress pool: {pool}"))
            })?;
        limits.apply(field, value)?;
        self.hw_write(hw, TmReg::IgPool { pool, field }, value)?;
        self.pools.ig_pools[usize::from(pool)] = limits;
        Ok(())
    }

    pub fn ig_pool_pfc_limit_set(
        &mut self,
        hw: &impl TmHwOps,
        pool: u8,
        icos: u8,
        limit: u32,
    ) -> TmResult<()> {
        self.ready()?;
        if icos >= self.sizing.icos_levels {
            return Err(TmError::InvalidArg(format!("no such icos: {icos}")));
        }
        if pool >= self.sizing.ig_pools {
            return Err(TmError::InvalidArg(format!(
                "no such ingress pool: {pool}"
            )));
        }
        self.hw_write(hw, TmReg::IgPoolPfcLimit { pool, icos }, limit)?;
        self.pools.ig_pfc_limits[usize::from(pool)][usize::from(icos)] = limit;
        Ok(())
    }

    pub fn eg_pool_set(
        &mut self,
        hw: &impl TmHwOps,
        pool: u8,
        field: PoolField,
        value: u32,
    ) -> TmResult<()> {
        self.ready()?;
        let mut limits = self
            .pools
            .eg_pools
            .get(usize::from(pool))
            .cloned()
            .ok_or_else(|| {
                TmError::InvalidArg(format!("no such egress pool: {pool}"))
            })?;
        limits.apply(field, value)?;
        self.hw_write(hw, TmReg::EgPool { pool, field }, value)?;
        self.pools.eg_pools[usize::from(pool)] = limits;
        Ok(())
    }

    pub fn pre_fifo_limit_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        fifo: u8,
        limit: u32,
    ) -> TmResult<()> {
        self.ready()?;
        self.pipe(pipe)?;
        if fifo >= self.sizing.mc_fifos {
            return Err(TmError::InvalidArg(format!("no such fifo: {fifo}")));
        }
        self.hw_write(hw, TmReg::PreFifoLimit { pipe, fifo }, limit)?;
        self.pools.pre_fifo_limits[usize::from(pipe)][usize::from(fifo)] =
            limit;
        Ok(())
    }
}
