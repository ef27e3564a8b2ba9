// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Compare a restored device context with the live one, field by field.
//!
//! Some fields can't be recovered exactly.  Shaping rates lose their low
//! bits in the hardware encoding and are compared within a tolerance band.
//! Hysteresis values the hardware couldn't represent come back as the
//! generation's default, and are accepted if the programmed value was within
//! one quantum of it.  Other fields can't be read back at all on some
//! generations; a mismatch on one of those is reported as skipped rather
//! than failed.

use std::fmt;

use slog::{debug, error, info, o, Logger};
use strum::IntoEnumIterator;

use aal::{
    McFifoField, PipeField, PortField, PpgField, QProfileField, QueueField,
    TofinoFamily,
};

use crate::config::TmConfig;
use crate::ctx::{queue_fields, FieldAccess, TmCtx};
use crate::types::{RateKind, TmError, TmResult};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumIter,
)]
pub enum VerifyDomain {
    Ppg,
    QProfile,
    Port,
    Queue,
    Pipe,
    McFifo,
}

/// Everything that verification compares.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerifyField {
    Ppg(PpgField),
    PpgInUse,
    QProfile(QProfileField),
    QCount,
    QMap,
    Port(PortField),
    Queue(QueueField),
    QueueRate(RateKind),
    Pipe(PipeField),
    McFifo(McFifoField),
}

impl VerifyField {
    /// Every field verification compares.
    pub fn all() -> Vec<VerifyField> {
        let mut fields = vec![VerifyField::PpgInUse];
        fields.extend(PpgField::iter().map(VerifyField::Ppg));
        fields.extend(QProfileField::iter().map(VerifyField::QProfile));
        fields.extend([VerifyField::QCount, VerifyField::QMap]);
        fields.extend(PortField::iter().map(VerifyField::Port));
        fields.extend(queue_fields().map(VerifyField::Queue));
        fields.extend(RateKind::iter().map(VerifyField::QueueRate));
        fields.extend(PipeField::iter().map(VerifyField::Pipe));
        fields.extend(McFifoField::iter().map(VerifyField::McFifo));
        fields
    }
}

impl fmt::Display for VerifyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyField::Ppg(field) => write!(f, "{field:?}"),
            VerifyField::PpgInUse => write!(f, "InUse"),
            VerifyField::QProfile(field) => write!(f, "{field:?}"),
            VerifyField::QCount => write!(f, "QueueCount"),
            VerifyField::QMap => write!(f, "QueueMap"),
            VerifyField::Port(field) => write!(f, "{field:?}"),
            VerifyField::Queue(field) => write!(f, "{field:?}"),
            VerifyField::QueueRate(kind) => write!(f, "{kind}Rate"),
            VerifyField::Pipe(field) => write!(f, "{field:?}"),
            VerifyField::McFifo(field) => write!(f, "{field:?}"),
        }
    }
}

/// Can a field be trusted to read back from the hardware on this
/// generation?  A mismatch on a field that can't is skipped, not failed.
pub fn verifiable(family: TofinoFamily, field: VerifyField) -> bool {
    use TofinoFamily::*;
    !matches!(
        (family, field),
        (Tofino1, VerifyField::Ppg(PpgField::FastRecovery))
            | (Tofino1, VerifyField::Port(PortField::IgHysteresis))
            | (Tofino1, VerifyField::Port(PortField::CtLimit))
            | (Tofino2 | Tofino3, VerifyField::Pipe(PipeField::TimestampShift))
            | (_, VerifyField::McFifo(McFifoField::Depth))
    )
}

/// Is `restored` within `pct` percent of `original`?
pub fn within_tolerance(restored: u32, original: u32, pct: u32) -> bool {
    u64::from(restored.abs_diff(original)) * 100
        <= u64::from(original) * u64::from(pct)
}

/// Hysteresis matches if it was restored exactly, or if the hardware
/// replaced a value it couldn't hold with its default.
pub fn hysteresis_matches(
    restored: u32,
    original: u32,
    hw_default: u32,
    quantum: u32,
) -> bool {
    restored == original
        || (restored == hw_default && restored.abs_diff(original) < quantum)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldResult {
    Pass,
    Fail,
    Skipped,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Mismatch {
    pub location: String,
    pub field: VerifyField,
    pub restored: u32,
    pub original: u32,
}

impl fmt::Display for Mismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}: restored {} original {}",
            self.location, self.field, self.restored, self.original
        )
    }
}

/// The outcome of verifying one domain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainReport {
    pub domain: VerifyDomain,
    pub checked: usize,
    pub passed: usize,
    pub failures: Vec<Mismatch>,
    pub skipped: Vec<Mismatch>,
    /// Objects that couldn't be compared at all.
    pub skipped_instances: Vec<String>,
}

impl DomainReport {
    fn new(domain: VerifyDomain) -> Self {
        DomainReport {
            domain,
            checked: 0,
            passed: 0,
            failures: Vec::new(),
            skipped: Vec::new(),
            skipped_instances: Vec::new(),
        }
    }

    pub fn ok(&self) -> bool {
        self.failures.is_empty()
    }
}

// The rules that apply to a single comparison.
struct Checker {
    family: TofinoFamily,
    rate_tolerance_pct: u32,
    hyst_quantum: u32,
}

impl Checker {
    fn compare(
        &self,
        field: VerifyField,
        restored: u32,
        original: u32,
    ) -> FieldResult {
        let matches = match field {
            VerifyField::QueueRate(_) => {
                within_tolerance(restored, original, self.rate_tolerance_pct)
            }
            VerifyField::Ppg(PpgField::Hysteresis)
            | VerifyField::Port(PortField::IgHysteresis) => hysteresis_matches(
                restored,
                original,
                self.family.default_hysteresis(),
                self.hyst_quantum,
            ),
            _ => restored == original,
        };
        if matches {
            FieldResult::Pass
        } else if verifiable(self.family, field) {
            FieldResult::Fail
        } else {
            FieldResult::Skipped
        }
    }

    fn record(
        &self,
        report: &mut DomainReport,
        location: &str,
        field: VerifyField,
        restored: u32,
        original: u32,
    ) -> FieldResult {
        report.checked += 1;
        let result = self.compare(field, restored, original);
        let mismatch = || Mismatch {
            location: location.to_string(),
            field,
            restored,
            original,
        };
        match result {
            FieldResult::Pass => report.passed += 1,
            FieldResult::Fail => report.failures.push(mismatch()),
            FieldResult::Skipped => report.skipped.push(mismatch()),
        }
        result
    }

    fn fields<D: FieldAccess>(
        &self,
        report: &mut DomainReport,
        location: &str,
        restored: &D,
        original: &D,
        fields: impl Iterator<Item = D::Field>,
        wrap: impl Fn(D::Field) -> VerifyField,
    ) {
        for field in fields {
            self.record(
                report,
                location,
                wrap(field),
                restored.value(field),
                original.value(field),
            );
        }
    }
}

fn verify_ppgs(c: &Checker, restored: &TmCtx, live: &TmCtx) -> DomainReport {
    let mut report = DomainReport::new(VerifyDomain::Ppg);
    for (pipe, (r_pipe, l_pipe)) in
        restored.pipes.iter().zip(&live.pipes).enumerate()
    {
        for (r, l) in r_pipe.ppgs.iter().zip(&l_pipe.ppgs) {
            if !r.in_use && !l.in_use {
                continue;
            }
            let location = format!("pipe{pipe}.ppg{}", l.ppg);
            // Nothing in the hardware refers to a PPG with no icos.
            if l.in_use && !l.is_default && l.icos_mask == 0 {
                report.skipped_instances.push(location);
                continue;
            }
            let in_use = c.record(
                &mut report,
                &location,
                VerifyField::PpgInUse,
                r.in_use.into(),
                l.in_use.into(),
            );
            if in_use != FieldResult::Pass {
                continue;
            }
            c.fields(
                &mut report,
                &location,
                r,
                l,
                PpgField::iter(),
                VerifyField::Ppg,
            );
        }
    }
    report
}

fn verify_q_profiles(
    c: &Checker,
    restored: &TmCtx,
    live: &TmCtx,
) -> DomainReport {
    let mut report = DomainReport::new(VerifyDomain::QProfile);
    for (pipe, (r_pipe, l_pipe)) in
        restored.pipes.iter().zip(&live.pipes).enumerate()
    {
        for (profile, (r, l)) in
            r_pipe.profiles.iter().zip(&l_pipe.profiles).enumerate()
        {
            let location = format!("pipe{pipe}.q_profile{profile}");
            c.fields(
                &mut report,
                &location,
                r,
                l,
                QProfileField::iter(),
                VerifyField::QProfile,
            );
            c.record(
                &mut report,
                &location,
                VerifyField::QCount,
                r.q_count.into(),
                l.q_count.into(),
            );
            for (slot, (rq, lq)) in r.mapping.iter().zip(&l.mapping).enumerate()
            {
                c.record(
                    &mut report,
                    &format!("{location}.slot{slot}"),
                    VerifyField::QMap,
                    (*rq).into(),
                    (*lq).into(),
                );
            }
        }
    }
    report
}

fn verify_ports(c: &Checker, restored: &TmCtx, live: &TmCtx) -> DomainReport {
    let mut report = DomainReport::new(VerifyDomain::Port);
    for (pipe, (r_pipe, l_pipe)) in
        restored.pipes.iter().zip(&live.pipes).enumerate()
    {
        for (r, l) in r_pipe.ports.iter().zip(&l_pipe.ports) {
            c.fields(
                &mut report,
                &format!("pipe{pipe}.port{}", l.port),
                r,
                l,
                PortField::iter(),
                VerifyField::Port,
            );
        }
    }
    report
}

fn verify_queues(
    c: &Checker,
    restored: &TmCtx,
    live: &TmCtx,
) -> DomainReport {
    let mut report = DomainReport::new(VerifyDomain::Queue);
    for (pipe, l_pipe) in (0..).zip(&live.pipes) {
        for port in &l_pipe.ports {
            let port = port.port;
            let Ok(profile) = live.q_profile(pipe, port) else {
                continue;
            };
            for index in 0..profile.q_count {
                let location = format!("pipe{pipe}.port{port}.queue{index}");
                let (Ok(r), Ok(l)) = (
                    restored.queue(pipe, port, index),
                    live.queue(pipe, port, index),
                ) else {
                    report.skipped_instances.push(location);
                    continue;
                };
                c.fields(
                    &mut report,
                    &location,
                    r,
                    l,
                    queue_fields(),
                    VerifyField::Queue,
                );
                for kind in RateKind::iter() {
                    c.record(
                        &mut report,
                        &location,
                        VerifyField::QueueRate(kind),
                        r.rate(kind),
                        l.rate(kind),
                    );
                }
            }
        }
    }
    report
}

fn verify_pipes(c: &Checker, restored: &TmCtx, live: &TmCtx) -> DomainReport {
    let mut report = DomainReport::new(VerifyDomain::Pipe);
    for (pipe, (r, l)) in restored.pipes.iter().zip(&live.pipes).enumerate() {
        c.fields(
            &mut report,
            &format!("pipe{pipe}"),
            &r.cfg,
            &l.cfg,
            PipeField::iter(),
            VerifyField::Pipe,
        );
    }
    report
}

fn verify_mc_fifos(
    c: &Checker,
    restored: &TmCtx,
    live: &TmCtx,
) -> DomainReport {
    let mut report = DomainReport::new(VerifyDomain::McFifo);
    for (pipe, (r_pipe, l_pipe)) in
        restored.pipes.iter().zip(&live.pipes).enumerate()
    {
        for (fifo, (r, l)) in
            r_pipe.mc_fifos.iter().zip(&l_pipe.mc_fifos).enumerate()
        {
            c.fields(
                &mut report,
                &format!("pipe{pipe}.mc_fifo{fifo}"),
                r,
                l,
                McFifoField::iter(),
                VerifyField::McFifo,
            );
        }
    }
    report
}

/// Compare each domain of a restored context with the live context it was
/// restored from.  Neither context is changed.
pub fn verify_device_cfg(
    log: &Logger,
    config: &TmConfig,
    restored: &TmCtx,
    live: &TmCtx,
) -> TmResult<Vec<DomainReport>> {
    if restored.dev != live.dev
        || restored.family != live.family
        || restored.sizing != live.sizing
    {
        return Err(TmError::Unexpected(format!(
            "can't compare {} device {} with {} device {}",
            restored.family, restored.dev, live.family, live.dev
        )));
    }
    let log = log.new(o!("unit" => "verify", "dev" => live.dev));
    let checker = Checker {
        family: live.family,
        rate_tolerance_pct: config.rate_tolerance_pct,
        hyst_quantum: config.hyst_quantum,
    };

    let passes: [fn(&Checker, &TmCtx, &TmCtx) -> DomainReport; 6] = [
        verify_ppgs,
        verify_q_profiles,
        verify_ports,
        verify_queues,
        verify_pipes,
        verify_mc_fifos,
    ];
    let reports: Vec<DomainReport> = passes
        .iter()
        .map(|pass| pass(&checker, restored, live))
        .collect();

    for report in &reports {
        for failure in &report.failures {
            error!(log, "{} mismatch: {failure}", report.domain);
        }
        for skipped in &report.skipped {
            debug!(log, "{} unverifiable: {skipped}", report.domain);
        }
        info!(log, "verified {}", report.domain;
            "checked" => report.checked,
            "passed" => report.passed,
            "failed" => report.failures.len(),
            "skipped" => report.skipped.len() + report.skipped_instances.len());
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tolerance() {
        assert!(within_tolerance(99, 100, 1));
        assert!(within_tolerance(101, 100, 1));
        assert!(!within_tolerance(98, 100, 1));
        assert!(within_tolerance(0, 0, 0));
        assert!(!within_tolerance(1, 0, 50));
    }

    #[test]
    fn test_hysteresis() {
        assert!(hysteresis_matches(64, 64, 64, 8));
        assert!(hysteresis_matches(64, 60, 64, 8));
        assert!(hysteresis_matches(32, 25, 32, 8));
        assert!(!hysteresis_matches(32, 24, 32, 8));
        // Only the hardware default gets the benefit of the doubt.
        assert!(!hysteresis_matches(56, 60, 64, 8));
    }

    #[test]
    fn test_allow_list() {
        let depth = VerifyField::McFifo(McFifoField::Depth);
        let ts = VerifyField::Pipe(PipeField::TimestampShift);
        for family in TofinoFamily::iter() {
            assert!(!verifiable(family, depth));
            assert!(verifiable(family, VerifyField::Ppg(PpgField::GminLimit)));
        }
        assert!(verifiable(TofinoFamily::Tofino1, ts));
        assert!(!verifiable(TofinoFamily::Tofino2, ts));
        assert!(!verifiable(
            TofinoFamily::Tofino1,
            VerifyField::Port(PortField::CtLimit)
        ));
        assert!(verifiable(
            TofinoFamily::Tofino3,
            VerifyField::Port(PortField::CtLimit)
        ));
    }

    #[test]
    fn test_unverifiable_count() {
        let count = |family| {
            VerifyField::all()
                .into_iter()
                .filter(|f| !verifiable(family, *f))
                .count()
        };
        assert_eq!(count(TofinoFamily::Tofino1), 4);
        assert_eq!(count(TofinoFamily::Tofino2), 2);
        assert_eq!(count(TofinoFamily::Tofino3), 2);
    }

    #[test]
    fn test_compare() {
        let c = Checker {
            family: TofinoFamily::Tofino1,
            rate_tolerance_pct: 1,
            hyst_quantum: 8,
        };
        let rate = VerifyField::QueueRate(RateKind::Max);
        assert_eq!(c.compare(rate, 99_900, 100_000), FieldResult::Pass);
        assert_eq!(c.compare(rate, 90_000, 100_000), FieldResult::Fail);
        let hyst = VerifyField::Ppg(PpgField::Hysteresis);
        assert_eq!(c.compare(hyst, 64, 60), FieldResult::Pass);
        let depth = VerifyField::McFifo(McFifoField::Depth);
        assert_eq!(c.compare(depth, 448, 100), FieldResult::Skipped);
        assert_eq!(
            c.compare(VerifyField::QCount, 4, 8),
            FieldResult::Fail
        );
    }

    #[test]
    fn test_mismatch_display() {
        let m = Mismatch {
            location: "pipe1.ppg3".to_string(),
            field: VerifyField::Ppg(PpgField::GminLimit),
            restored: 500,
            original: 512,
        };
        assert_eq!(
            m.to_string(),
            "pipe1.ppg3.GminLimit: restored 500 original 512"
        );
        assert_eq!(
            VerifyField::QueueRate(RateKind::Min).to_string(),
            "MinRate"
        );
    }
}
