// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::{
    LPort, PipeId, PortField, QProfileField, TmHwOps, TmReg,
    WAC_LIMIT_QUANTUM,
};

use super::{FieldAccess, QProfile, TmCtx};
use crate::types::{TmError, TmResult};

impl TmCtx {
    /// Carve `q_count` queues out of the port's group for the port.  The
    /// port's queues start right after those of the previous port in the
    /// group, and may not run into those of the next.  `mapping` gives the
    /// queue, relative to the port's first, fed by each mapping slot.
    pub fn port_q_carve(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        port: LPort,
        q_count: u16,
        mapping: &[u8],
    ) -> TmResult<()> {
        self.ready()?;
        let profile = self.port(pipe, port)?.qid_profile;
        if mapping.len() != usize::from(self.sizing.q_map_slots) {
            return Err(TmError::InvalidArg(format!(
                "queue mapping needs {} slots, not {}",
                self.sizing.q_map_slots,
                mapping.len()
            )));
        }
        if q_count == 0 {
            return Err(TmError::InvalidArg(
                "a port needs at least one queue".to_string(),
            ));
        }
        if let Some(q) = mapping.iter().find(|q| u16::from(**q) >= q_count) {
            return Err(TmError::InvalidArg(format!(
                "queue {q} mapped, but port only has {q_count}"
            )));
        }

        let channel = self.sizing.port_channel(port);
        let base = match channel {
            0 => 0,
            _ => {
                let prev = self.q_profile(pipe, port - 1)?;
                prev.base_queue + prev.q_count
            }
        };
        let last_in_group = channel + 1 == self.sizing.ports_per_pg
            || port + 1 == self.sizing.ports_per_pipe;
        let limit = if last_in_group {
            self.sizing.queues_per_pg
        } else {
            self.q_profile(pipe, port + 1)?.base_queue
        };
        if u32::from(base) + u32::from(q_count) > u32::from(limit) {
            return Err(TmError::InvalidArg(format!(
                "port {port} has room for {} queues, not {q_count}",
                limit.saturating_sub(base)
            )));
        }

        let cfg = &self.pipe(pipe)?.cfg;
        if cfg.neg_mirror_port == port
            && u16::from(cfg.neg_mirror_queue) >= q_count
        {
            return Err(TmError::InvalidArg(format!(
                "queue {} of port {port} is the negative mirror destination",
                cfg.neg_mirror_queue
            )));
        }

        let mapping = mapping.to_vec();
        self.q_profile_set(hw, pipe, profile, base, q_count, mapping)?;
        self.port_queues_release(pipe, port)?;
        self.port_queues_assign(pipe, port)
    }

    /// Program a queue profile and record it.
    pub(crate) fn q_profile_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        profile: u8,
        base_queue: u16,
        q_count: u16,
        mapping: Vec<u8>,
    ) -> TmResult<()> {
        let mut desc = QProfile {
            q_count,
            mapping,
            ..Default::default()
        };
        desc.apply(QProfileField::BaseQueue, base_queue.into())?;

        // The first port in a group has no base register.
        if self.sizing.port_channel(profile) != 0 {
            let reg = TmReg::QProfile {
                pipe,
                profile,
                field: QProfileField::BaseQueue,
            };
            self.hw_write(hw, reg, base_queue.into())?;
        }
        for (slot, queue) in (0..).zip(&desc.mapping) {
            let reg = TmReg::QProfileMap {
                pipe,
                profile,
                slot,
            };
            self.hw_write(hw, reg, (*queue).into())?;
        }

        self.q_map_cache
            .insert((pipe, profile), desc.mapping.clone());
        let slot = self
            .pipe_mut(pipe)?
            .profiles
            .get_mut(usize::from(profile))
            .ok_or_else(|| {
                TmError::InvalidArg(format!("no such profile: {profile}"))
            })?;
        *slot = desc;
        Ok(())
    }

    /// Give up ownership of every queue held by a port.
    pub(crate) fn port_queues_release(
        &mut self,
        pipe: PipeId,
        port: LPort,
    ) -> TmResult<()> {
        self.pipe_mut(pipe)?
            .queues
            .iter_mut()
            .filter(|q| q.port == Some(port))
            .for_each(|q| q.port = None);
        Ok(())
    }

    /// Hand the queues described by the port's profile to the port.
    pub(crate) fn port_queues_assign(
        &mut self,
        pipe: PipeId,
        port: LPort,
    ) -> TmResult<()> {
        let profile = self.q_profile(pipe, port)?;
        let (base, q_count) = (profile.base_queue, profile.q_count);
        let end = u32::from(base) + u32::from(q_count);
        if end > u32::from(self.sizing.queues_per_pg) {
            return Err(TmError::Unexpected(format!(
                "port {port} queues {base}..{end} run past the end of its group"
            )));
        }
        let first = usize::from(self.sizing.pg_base_queue(port))
            + usize::from(base);
        let queues = &mut self.pipe_mut(pipe)?.queues;
        for index in 0..q_count {
            let num = first + usize::from(index);
            let queue = queues.get_mut(num).ok_or_else(|| {
                TmError::Unexpected(format!("port {port} has no queue {num}"))
            })?;
            match queue.port {
                Some(owner) if owner != port => {
                    return Err(TmError::Unexpected(format!(
                        "queue {num} of port {port} belongs to port {owner}"
                    )));
                }
                _ => {
                    queue.port = Some(port);
                    queue.index = index;
                }
            }
        }
        Ok(())
    }

    pub fn port_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        port: LPort,
        field: PortField,
        value: u32,
    ) -> TmResult<()> {
        self.ready()?;
        let mut desc = self.port(pipe, port)?.clone();
        let value = match field {
            // These are kept in 8-cell units by the hardware.
            PortField::IgLimit | PortField::SkidLimit => {
                value - value % WAC_LIMIT_QUANTUM
            }
            PortField::QidProfile => {
                if !self.is_internal_call() {
                    return Err(TmError::InvalidArg(
                        "queue profiles are assigned when carving queues"
                            .to_string(),
                    ));
                }
                if value >= self.sizing.ports_per_pipe.into() {
                    return Err(TmError::InvalidArg(format!(
                        "no such profile: {value}"
                    )));
                }
                value
            }
            _ => value,
        };
        desc.apply(field, value)?;
        self.hw_write(hw, TmReg::Port { pipe, port, field }, value)?;
        self.pipe_mut(pipe)?.ports[usize::from(port)] = desc;
        Ok(())
    }
}
