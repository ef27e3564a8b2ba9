// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::{LPort, PipeId, QueueField, RateCode, TmHwOps, TmReg};

use super::{queue_fields, rate_fields, FieldAccess, QueueDesc, TmCtx};
use crate::types::{RateKind, TmError, TmResult};

impl TmCtx {
    fn queue_mut(
        &mut self,
        pipe: PipeId,
        queue: u16,
    ) -> TmResult<&mut QueueDesc> {
        self.pipe_mut(pipe)?
            .queues
            .get_mut(usize::from(queue))
            .ok_or_else(|| TmError::Unexpected(format!("no queue {queue}")))
    }

    /// Change one of the settings of a port's queue.  `index` is the queue's
    /// position within the port.
    pub fn queue_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        port: LPort,
        index: u16,
        field: QueueField,
        value: u32,
    ) -> TmResult<()> {
        self.ready()?;
        if !queue_fields().any(|f| f == field) {
            return Err(TmError::InvalidArg(format!(
                "{} is set through the queue's rate",
                <&'static str>::from(field)
            )));
        }
        if field == QueueField::AppPool && value >= self.sizing.eg_pools.into()
        {
            return Err(TmError::InvalidArg(format!(
                "no such egress pool: {value}"
            )));
        }
        let queue = self.queue_num(pipe, port, index)?;
        let mut desc = self.queue(pipe, port, index)?.clone();
        desc.apply(field, value)?;
        self.hw_write(hw, TmReg::Queue { pipe, queue, field }, value)?;
        *self.queue_mut(pipe, queue)? = desc;
        Ok(())
    }

    /// Set one of the queue's shaping rates, in kbps.  The hardware keeps
    /// only the most significant bits of the rate.
    pub fn queue_rate_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        port: LPort,
        index: u16,
        kind: RateKind,
        kbps: u32,
    ) -> TmResult<()> {
        self.ready()?;
        let queue = self.queue_num(pipe, port, index)?;
        let code = RateCode::from_rate(kbps);
        let (mant, exp) = rate_fields(kind);
        self.hw_write(
            hw,
            TmReg::Queue {
                pipe,
                queue,
                field: mant,
            },
            code.mantissa,
        )?;
        self.hw_write(
            hw,
            TmReg::Queue {
                pipe,
                queue,
                field: exp,
            },
            code.exponent,
        )?;
        self.queue_mut(pipe, queue)?.set_rate(kind, kbps);
        Ok(())
    }
}
