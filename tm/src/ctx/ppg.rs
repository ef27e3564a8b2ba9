// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use aal::{LPort, PipeId, PpgField, PpgNum, TmHwOps, TmReg};

use super::{
    ppg_fields, reset_desc, CounterHandle, FieldAccess, PpgDesc, TmCtx,
};
use crate::types::{TmError, TmResult};

impl TmCtx {
    fn ppg_mut(&mut self, pipe: PipeId, ppg: PpgNum) -> TmResult<&mut PpgDesc> {
        self.pipe_mut(pipe)?
            .ppgs
            .get_mut(usize::from(ppg))
            .ok_or_else(|| TmError::InvalidArg(format!("no such ppg: {ppg}")))
    }

    // Fetch a PFC PPG that has been handed out to a port.
    fn pfc_ppg(&self, pipe: PipeId, ppg: PpgNum) -> TmResult<&PpgDesc> {
        let desc = self.ppg(pipe, ppg)?;
        if desc.is_default {
            Err(TmError::InvalidArg(format!(
                "ppg {ppg} is a port's default ppg"
            )))
        } else if !desc.in_use {
            Err(TmError::InvalidArg(format!("ppg {ppg} is not allocated")))
        } else {
            Ok(desc)
        }
    }

    /// Claim a free PFC PPG for a port.
    pub fn ppg_allocate(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        port: LPort,
    ) -> TmResult<PpgNum> {
        self.ready()?;
        self.port(pipe, port)?;
        let ppg = self
            .pipe(pipe)?
            .ppgs
            .iter()
            .find(|desc| !desc.is_default && !desc.in_use)
            .map(|desc| desc.ppg)
            .ok_or_else(|| {
                TmError::ObjectNotFound(format!("free ppg on pipe {pipe}"))
            })?;

        let drops = hw.ppg_drop_count_get(self.dev, pipe, ppg)?;
        self.ppg_bind(pipe, ppg, port)?;
        self.drop_counter_seed(CounterHandle { pipe, port, ppg }, drops);
        Ok(ppg)
    }

    /// Mark a PFC PPG as belonging to a port.
    pub(crate) fn ppg_bind(
        &mut self,
        pipe: PipeId,
        ppg: PpgNum,
        port: LPort,
    ) -> TmResult<()> {
        let desc = self.ppg_mut(pipe, ppg)?;
        if desc.is_default {
            return Err(TmError::InvalidArg(format!(
                "ppg {ppg} is a port's default ppg"
            )));
        }
        match (desc.in_use, desc.port) {
            (true, Some(owner)) if owner != port => {
                Err(TmError::AlreadyExists(format!(
                    "ppg {ppg} belongs to port {owner}"
                )))
            }
            _ => {
                desc.in_use = true;
                desc.port = Some(port);
                Ok(())
            }
        }
    }

    /// Return a PFC PPG to the free pool.  Its icos are handed back to the
    /// port's default PPG and its settings return to their reset values.
    pub fn ppg_free(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        ppg: PpgNum,
    ) -> TmResult<()> {
        self.ready()?;
        let desc = self.pfc_ppg(pipe, ppg)?;
        let port = desc.port;
        if desc.icos_mask != 0 {
            self.ppg_icos_mapping_set(hw, pipe, ppg, 0)?;
        }

        let mut fresh = PpgDesc {
            ppg,
            ..Default::default()
        };
        reset_desc(self.family, &mut fresh, ppg_fields(), |field| {
            TmReg::Ppg { pipe, ppg, field }
        });
        for field in ppg_fields() {
            let reg = TmReg::Ppg { pipe, ppg, field };
            match self.hw_write(hw, reg, fresh.value(field)) {
                Ok(()) | Err(TmError::NotSupported) => {}
                Err(e) => return Err(e),
            }
        }
        *self.ppg_mut(pipe, ppg)? = fresh;
        if let Some(port) = port {
            self.drop_counter_remove(CounterHandle { pipe, port, ppg });
        }
        Ok(())
    }

    /// Route traffic with the given icos on the PPG's port to the PPG.  Any
    /// icos the PPG previously served that isn't in the new mask goes back
    /// to the port's default PPG.
    pub fn ppg_icos_mapping_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        ppg: PpgNum,
        icos_mask: u8,
    ) -> TmResult<()> {
        self.ready()?;
        let desc = self.pfc_ppg(pipe, ppg)?;
        let old_mask = desc.icos_mask;
        let port = desc.port.ok_or_else(|| {
            TmError::Unexpected(format!("ppg {ppg} has no port"))
        })?;
        let port_desc = self.port(pipe, port)?;
        let dflt = port_desc.default_ppg;

        let mut covered = icos_mask;
        for (icos, other) in (0..).zip(&port_desc.ppgs) {
            let bit = 1u8 << icos;
            match other {
                Some(other) if *other != ppg => {
                    if icos_mask & bit != 0 {
                        return Err(TmError::AlreadyExists(format!(
                            "icos {icos} of port {port} is served by ppg \
                            {other}"
                        )));
                    }
                    covered |= bit;
                }
                _ => {}
            }
        }
        let dflt_mask = !covered;

        let mut writes = Vec::new();
        for icos in 0..self.sizing.icos_levels {
            let bit = 1u8 << icos;
            let reg = TmReg::PortIcosPpg { pipe, port, icos };
            if icos_mask & bit != 0 && old_mask & bit == 0 {
                writes.push((reg, ppg));
            } else if icos_mask & bit == 0 && old_mask & bit != 0 {
                writes.push((reg, dflt));
            }
        }
        let mask_reg = |ppg| TmReg::Ppg {
            pipe,
            ppg,
            field: PpgField::IcosMask,
        };
        for (reg, value) in writes {
            self.hw_write(hw, reg, value.into())?;
        }
        self.hw_write(hw, mask_reg(ppg), icos_mask.into())?;
        self.hw_write(hw, mask_reg(dflt), dflt_mask.into())?;

        self.ppg_mut(pipe, ppg)?.icos_mask = icos_mask;
        self.ppg_mut(pipe, dflt)?.icos_mask = dflt_mask;
        let port_desc = &mut self.pipe_mut(pipe)?.ports[usize::from(port)];
        for (icos, slot) in (0..).zip(port_desc.ppgs.iter_mut()) {
            let bit = 1u8 << icos;
            if icos_mask & bit != 0 {
                *slot = Some(ppg);
            } else if *slot == Some(ppg) {
                *slot = None;
            }
        }
        self.icos_ppg_cache
            .retain(|(p, l, _), _| *p != pipe || *l != port);
        Ok(())
    }

    /// Change one of a PPG's settings.
    pub fn ppg_set(
        &mut self,
        hw: &impl TmHwOps,
        pipe: PipeId,
        ppg: PpgNum,
        field: PpgField,
        value: u32,
    ) -> TmResult<()> {
        self.ready()?;
        if field == PpgField::IcosMask {
            return Err(TmError::InvalidArg(
                "the icos mask is set through the icos mapping".to_string(),
            ));
        }
        let mut desc = self.ppg(pipe, ppg)?.clone();
        if !desc.in_use {
            return Err(TmError::InvalidArg(format!(
                "ppg {ppg} is not allocated"
            )));
        }
        if field == PpgField::AppPool && value >= self.sizing.ig_pools.into() {
            return Err(TmError::InvalidArg(format!(
                "no such ingress pool: {value}"
            )));
        }
        desc.apply(field, value)?;
        self.hw_write(hw, TmReg::Ppg { pipe, ppg, field }, value)?;
        *self.ppg_mut(pipe, ppg)? = desc;
        Ok(())
    }
}
