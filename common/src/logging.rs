// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

use std::fs::OpenOptions;

use anyhow::Context;
use serde::Deserialize;
use slog::Drain;

/// Should log records be formatted for people or for machines?
#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Human,
    Json,
}

fn build_drain<W>(
    name: &'static str,
    writer: W,
    format: LogFormat,
) -> slog::Fuse<slog_async::Async>
where
    W: std::io::Write + Send + 'static,
{
    match format {
        LogFormat::Human => {
            let decorator = slog_term::PlainDecorator::new(writer);
            let drain = slog_term::FullFormat::new(decorator).build().fuse();
            slog_async::Async::new(drain).build().fuse()
        }
        LogFormat::Json => {
            let drain = slog_bunyan::with_name(name, writer).build().fuse();
            slog_async::Async::new(drain).build().fuse()
        }
    }
}

/// Build the root logger for a program.  If `log_file` is set, records are
/// appended to that file; otherwise they go to stdout.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    let drain = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            build_drain(name, file, format)
        }
        None => build_drain(name, std::io::stdout(), format),
    };

    Ok(slog::Logger::root(drain, slog::o!("name" => name)))
}

/// A synchronous logger that writes through the test harness's capture, for
/// use in unit and integration tests.
pub fn test_logger() -> slog::Logger {
    let decorator =
        slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_parse_format() {
        assert_eq!(LogFormat::from_str("human").unwrap(), LogFormat::Human);
        assert_eq!(LogFormat::from_str("json").unwrap(), LogFormat::Json);
        assert!(LogFormat::from_str("xml").is_err());
    }
}
