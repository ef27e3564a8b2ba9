// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::io::stdout;
use std::io::Write;

use colored::*;
use strum::IntoEnumIterator;
use tabwriter::TabWriter;

use aal::TofinoFamily;
use tm::verify::{verifiable, DomainReport, Mismatch, VerifyField};

fn mismatch_row(
    tw: &mut TabWriter<std::io::Stdout>,
    m: &Mismatch,
    result: ColoredString,
) -> std::io::Result<()> {
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}",
        m.location, m.field, m.restored, m.original, result
    )
}

pub fn print(reports: &[DomainReport], verbose: bool) -> anyhow::Result<()> {
    let mut tw = TabWriter::new(stdout());
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}\t{}",
        "Domain".underline(),
        "Checked".underline(),
        "Passed".underline(),
        "Failed".underline(),
        "Skipped".underline(),
        "Status".underline()
    )?;
    for r in reports {
        let status = if r.ok() { "ok".green() } else { "FAILED".red() };
        writeln!(
            tw,
            "{}\t{}\t{}\t{}\t{}\t{}",
            r.domain,
            r.checked,
            r.passed,
            r.failures.len(),
            r.skipped.len() + r.skipped_instances.len(),
            status
        )?;
    }
    tw.flush()?;

    if !verbose {
        return Ok(());
    }
    println!();
    writeln!(
        tw,
        "{}\t{}\t{}\t{}\t{}",
        "Location".underline(),
        "Field".underline(),
        "Restored".underline(),
        "Original".underline(),
        "Result".underline()
    )?;
    for r in reports {
        for m in &r.failures {
            mismatch_row(&mut tw, m, "fail".red())?;
        }
        for m in &r.skipped {
            mismatch_row(&mut tw, m, "skipped".yellow())?;
        }
        for instance in &r.skipped_instances {
            let result = "not in hardware".yellow();
            writeln!(tw, "{instance}\t-\t-\t-\t{result}")?;
        }
    }
    tw.flush().map_err(|e| e.into())
}

pub fn unverifiable() -> anyhow::Result<()> {
    let mut tw = TabWriter::new(stdout());
    writeln!(tw, "{}\t{}", "Family".underline(), "Field".underline())?;
    for family in TofinoFamily::iter() {
        for field in VerifyField::all() {
            if !verifiable(family, field) {
                writeln!(tw, "{family}\t{field:?}")?;
            }
        }
    }
    tw.flush().map_err(|e| e.into())
}
