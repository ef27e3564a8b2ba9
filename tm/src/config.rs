// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Run-time settings for the TM driver.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use aal::TofinoFamily;
use aal::HYST_QUANTUM;
use common::logging::LogFormat;

fn default_rate_tolerance() -> u32 {
    1
}

fn default_hyst_quantum() -> u32 {
    HYST_QUANTUM
}

/// The TmConfig structure captures the settings that can be provided in a
/// config file.  Anything missing from the file takes its default value.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct TmConfig {
    /// If set, where the log should be written.  If not set, the log goes to
    /// stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// The ASIC generation assumed when a device is added without one.
    pub family: TofinoFamily,

    /// Manage fewer pipes than the generation provides.
    pub pipes: Option<u8>,

    /// How far, as a percentage of the programmed value, a restored shaping
    /// rate may drift and still verify.
    pub rate_tolerance_pct: u32,

    /// A restored hysteresis value within this many cells of the programmed
    /// value verifies, if the hardware fell back to its default.
    pub hyst_quantum: u32,
}

impl Default for TmConfig {
    fn default() -> Self {
        TmConfig {
            log_file: None,
            log_format: LogFormat::Human,
            family: TofinoFamily::Tofino1,
            pipes: None,
            rate_tolerance_pct: default_rate_tolerance(),
            hyst_quantum: default_hyst_quantum(),
        }
    }
}

impl TmConfig {
    pub fn load(path: &Path) -> anyhow::Result<TmConfig> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::parse(&contents)
            .with_context(|| format!("parsing {}", path.display()))
    }

    pub fn parse(contents: &str) -> anyhow::Result<TmConfig> {
        let config: TmConfig = toml::from_str(contents)?;
        if config.rate_tolerance_pct > 100 {
            anyhow::bail!(
                "rate_tolerance_pct must be at most 100, not {}",
                config.rate_tolerance_pct
            );
        }
        if config.hyst_quantum == 0 {
            anyhow::bail!("hyst_quantum must be non-zero");
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config() {
        assert_eq!(TmConfig::parse("").unwrap(), TmConfig::default());
    }

    #[test]
    fn test_parse_config() {
        let config = TmConfig::parse(
            r#"
            log_format = "json"
            family = "tofino2"
            pipes = 2
            rate_tolerance_pct = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.family, TofinoFamily::Tofino2);
        assert_eq!(config.pipes, Some(2));
        assert_eq!(config.rate_tolerance_pct, 5);
        assert_eq!(config.hyst_quantum, 8);
    }

    #[test]
    fn test_bad_config() {
        assert!(TmConfig::parse("rate_tolerance_pct = 101").is_err());
        assert!(TmConfig::parse("hyst_quantum = 0").is_err());
        assert!(TmConfig::parse("family = \"tofino9\"").is_err());
    }
}
