// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::sync::Mutex;

use rand::random;
use serde::{Deserialize, Serialize};
use slog::{o, Logger};

use aal::{
    AsicError, AsicResult, DevId, PipeId, PpgNum, Readback, TmDomain,
    TmHwOps, TmReg, TofinoFamily,
};

/// Chaos that happens according to a probability.
#[derive(Default, Debug, Serialize, Deserialize, Copy, Clone)]
pub struct Chaos {
    /// A probability between 0.0 and 1.0
    pub value: f64,
}

impl Chaos {
    /// Create a new chaos value.
    pub fn new(value: f64) -> Self {
        let mut c = Self::default();
        c.set(value);
        c
    }
    /// Set the chaos value. Panics if value is outside the range [0.0, 1.0].
    pub fn set(&mut self, value: f64) {
        if !(0.0..=1.0).contains(&value) {
            panic!("probability out of range");
        }
        self.value = value;
    }

    /// Get the underlying chaos value.
    pub fn get(&self) -> f64 {
        self.value
    }

    /// Return a chaos error according to the underlying probability value.
    pub fn unfurled(&self, log: &Logger, message: &str) -> AsicResult<()> {
        if self.value >= random() {
            slog::error!(log, "chaos error: {}", message);
            return Err(AsicError::Synthetic(message.into()));
        }
        Ok(())
    }
}

/// The chaos ASIC config contains chaos values for each TM operation.
#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct AsicConfig {
    pub tm_read: Chaos,
    pub tm_write: Chaos,
    pub ppg_drop_count_get: Chaos,
    pub intr_enable_set: Chaos,
}

impl AsicConfig {
    /// The uniform chaos config applies a uniform underlying probability to
    /// each chaos value.
    pub fn uniform(v: f64) -> Self {
        Self {
            tm_read: Chaos::new(v),
            tm_write: Chaos::new(v),
            ppg_drop_count_get: Chaos::new(v),
            intr_enable_set: Chaos::new(v),
        }
    }

    /// Apply the probability to the operations that read state back from
    /// the hardware only.
    pub fn uniform_get(v: f64) -> Self {
        Self {
            tm_read: Chaos::new(v),
            ppg_drop_count_get: Chaos::new(v),
            ..Default::default()
        }
    }

    /// Apply the probability to the operations that change the hardware
    /// only.
    pub fn uniform_set(v: f64) -> Self {
        Self {
            tm_write: Chaos::new(v),
            intr_enable_set: Chaos::new(v),
            ..Default::default()
        }
    }
}

/// Which registers a fault applies to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegMatch {
    Exact(TmReg),
    Domain(TmDomain),
}

impl RegMatch {
    fn matches(&self, reg: &TmReg) -> bool {
        match self {
            RegMatch::Exact(r) => r == reg,
            RegMatch::Domain(d) => reg.domain() == *d,
        }
    }
}

/// The error an injected fault produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaultKind {
    NotSupported,
    InvalidArg,
    Synthetic,
}

/// A fault that fires on every access to the matching registers, until it is
/// cleared.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegFault {
    pub target: RegMatch,
    pub kind: FaultKind,
}

impl RegFault {
    pub fn new(target: RegMatch, kind: FaultKind) -> Self {
        RegFault { target, kind }
    }

    fn error(&self, reg: &TmReg) -> AsicError {
        match self.kind {
            FaultKind::NotSupported => AsicError::OperationUnsupported,
            FaultKind::InvalidArg => {
                AsicError::InvalidArg(format!("injected fault on {reg}"))
            }
            FaultKind::Synthetic => {
                AsicError::Synthetic(format!("injected fault on {reg}"))
            }
        }
    }
}

/// A handle that wraps another TM implementation and makes it misbehave.
pub struct Handle<H> {
    inner: H,
    config: AsicConfig,
    faults: Mutex<Vec<RegFault>>,
    log: Logger,
}

impl<H: TmHwOps> Handle<H> {
    /// Wrap `inner` with the provided logger and config.
    pub fn new(log: &Logger, config: &AsicConfig, inner: H) -> Self {
        Handle {
            inner,
            config: config.clone(),
            faults: Mutex::new(Vec::new()),
            log: log.new(o!("unit" => "chaos")),
        }
    }

    /// The implementation being wrapped.
    pub fn inner(&self) -> &H {
        &self.inner
    }

    pub fn inject(&self, fault: RegFault) {
        slog::info!(self.log, "injecting fault"; "fault" => ?fault);
        self.faults.lock().unwrap().push(fault);
    }

    pub fn clear_faults(&self) {
        self.faults.lock().unwrap().clear();
    }

    fn check_faults(&self, reg: &TmReg) -> AsicResult<()> {
        let faults = self.faults.lock().unwrap();
        match faults.iter().find(|f| f.target.matches(reg)) {
            Some(fault) => {
                slog::debug!(self.log, "fault on {reg}"; "kind" => ?fault.kind);
                Err(fault.error(reg))
            }
            None => Ok(()),
        }
    }
}

/// A convenience macro for unfurling chaos. The $name should be a regular
/// `Chaos` member of [`AsicConfig`]. The `handle` is a [`Handle`] object.
macro_rules! unfurl {
    ($handle:ident, $name:ident) => {
        $handle
            .config
            .$name
            .unfurled(&$handle.log, stringify!($name))?
    };
}

impl<H: TmHwOps> TmHwOps for Handle<H> {
    fn asic_family(&self, dev: DevId) -> AsicResult<TofinoFamily> {
        self.inner.asic_family(dev)
    }

    fn tm_read(&self, dev: DevId, reg: TmReg) -> AsicResult<Readback> {
        unfurl!(self, tm_read);
        self.check_faults(&reg)?;
        self.inner.tm_read(dev, reg)
    }

    fn tm_write(&self, dev: DevId, reg: TmReg, value: u32) -> AsicResult<()> {
        unfurl!(self, tm_write);
        self.check_faults(&reg)?;
        self.inner.tm_write(dev, reg, value)
    }

    fn ppg_drop_count_get(
        &self,
        dev: DevId,
        pipe: PipeId,
        ppg: PpgNum,
    ) -> AsicResult<u64> {
        unfurl!(self, ppg_drop_count_get);
        self.inner.ppg_drop_count_get(dev, pipe, ppg)
    }

    fn intr_enable_set(&self, dev: DevId, enabled: bool) -> AsicResult<()> {
        unfurl!(self, intr_enable_set);
        self.inner.intr_enable_set(dev, enabled)
    }
}
