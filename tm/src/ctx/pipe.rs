// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::{McFifoField, PipeField, PipeId, TmHwOps, TmReg};

use super::{FieldAccess, TmCtx};
use crate::types::{TmError, TmResult};

impl TmCtx {
    pub fn pipe_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        field: PipeField,
        value: u32,
    ) -> TmResult<()> {
        self.ready()?;
        if field == PipeField::NegMirrorPort
            && value >= self.sizing.ports_per_pipe.into()
        {
            return Err(TmError::InvalidArg(format!("no such port: {value}")));
        }
        let mut cfg = self.pipe(pipe)?.cfg.clone();
        cfg.apply(field, value)?;
        // A restore sets the port and queue one at a time, and checks the
        // pair once both are in.
        let mirror = matches!(
            field,
            PipeField::NegMirrorPort | PipeField::NegMirrorQueue
        );
        if mirror && !self.is_internal_call() {
            let (port, queue) = (cfg.neg_mirror_port, cfg.neg_mirror_queue);
            let q_count = self.q_profile(pipe, port)?.q_count;
            if u16::from(queue) >= q_count {
                return Err(TmError::InvalidArg(format!(
                    "port {port} has {q_count} queues, so can't mirror to \
                    queue {queue}"
                )));
            }
        }
        self.hw_write(hw, TmReg::Pipe { pipe, field }, value)?;
        self.pipe_mut(pipe)?.cfg = cfg;
        Ok(())
    }

    pub fn mc_fifo_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        fifo: u8,
        field: McFifoField,
        value: u32,
    ) -> TmResult<()> {
        self.ready()?;
        let mut desc = self
            .pipe(pipe)?
            .mc_fifos
            .get(usize::from(fifo))
            .cloned()
            .ok_or_else(|| {
                TmError::InvalidArg(format!("no such fifo: {fifo}"))
            })?;
        desc.apply(field, value)?;
        self.hw_write(hw, TmReg::McFifo { pipe, fifo, field }, value)?;
        self.pipe_mut(pipe)?.mc_fifos[usize::from(fifo)] = desc;
        Ok(())
    }
}
