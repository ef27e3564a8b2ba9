// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::path::PathBuf;

use anyhow::Context;
use slog::info;
use structopt::*;

use aal::{DevId, TofinoFamily};
use asic::chaos;
use asic::tofino_stub::{AsicConfig, StubHandle};
use tm::config::TmConfig;
use tm::device::TmRegistry;
use tm::types::WarmInitMode;

mod report;
mod sample;

// The model only ever holds a single device.
const DEV: DevId = 0;

#[derive(Debug, StructOpt)]
#[structopt(
    name = "tmadm",
    about = "exercises Traffic Manager restore and verification against the \
    ASIC model"
)]
struct GlobalOpts {
    #[structopt(short, long, help = "driver config file")]
    config: Option<PathBuf>,

    #[structopt(short, long, help = "ASIC generation to model")]
    family: Option<TofinoFamily>,

    #[structopt(short, long, help = "number of pipes to manage")]
    pipes: Option<u8>,

    #[structopt(long, help = "program a sample configuration first")]
    sample: bool,

    #[structopt(
        long,
        default_value = "0",
        help = "probability that a hardware read fails"
    )]
    read_chaos: f64,

    #[structopt(short, long, help = "list each mismatch")]
    verbose: bool,

    #[structopt(subcommand)]
    cmd: Commands,
}

#[derive(Debug, StructOpt)]
enum Commands {
    /// Cold boot a device, then restore its configuration into a scratch
    /// context and compare the two.
    #[structopt(visible_alias = "ut")]
    UtRestore,
    /// Cold boot a device, restart it hitlessly, then restore and compare
    /// again.
    Hitless,
    /// List the fields that can't be verified on each generation.
    Unverifiable,
}

fn run(
    opts: &GlobalOpts,
    config: TmConfig,
    hitless: bool,
) -> anyhow::Result<()> {
    let log =
        common::logging::init("tmadm", &config.log_file, config.log_format)?;
    let family = config.family;

    let model = AsicConfig::single(DEV, family, config.pipes);
    let stub =
        StubHandle::new(&log, &model).context("creating ASIC model")?;
    // Only reads are made to fail, so the device can always be cold booted.
    let chaos_config = chaos::AsicConfig {
        tm_read: chaos::Chaos::new(opts.read_chaos),
        ..Default::default()
    };
    let hw = chaos::Handle::new(&log, &chaos_config, stub);

    let registry = TmRegistry::new(&log, hw, config);
    registry
        .device_add(DEV, family, WarmInitMode::Cold)
        .context("adding device")?;
    if opts.sample {
        sample::program(&registry, DEV)
            .context("programming sample configuration")?;
    }
    if hitless {
        registry.warm_init_begin(DEV, WarmInitMode::Hitless)?;
        registry
            .device_add(DEV, family, WarmInitMode::Hitless)
            .context("restarting device")?;
        info!(log, "device restarted");
    }

    let reports = registry
        .ut_restore_device_cfg(DEV)
        .context("restoring device")?;
    report::print(&reports, opts.verbose)?;
    if reports.iter().any(|r| !r.ok()) {
        anyhow::bail!("restored configuration does not match");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let opts = GlobalOpts::from_args();
    let mut config = match &opts.config {
        Some(path) => TmConfig::load(path)?,
        None => TmConfig::default(),
    };
    if let Some(family) = opts.family {
        config.family = family;
    }
    if opts.pipes.is_some() {
        config.pipes = opts.pipes;
    }
    if !(0.0..=1.0).contains(&opts.read_chaos) {
        anyhow::bail!("read chaos must be between 0 and 1");
    }

    match opts.cmd {
        Commands::UtRestore => run(&opts, config, false),
        Commands::Hitless => run(&opts, config, true),
        Commands::Unverifiable => report::unverifiable(),
    }
}
