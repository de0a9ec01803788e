// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI argument surface (C11), grounded on the teacher's
//! `crates/cli/src/config.rs` `#[derive(Parser)]` idiom.

use std::path::PathBuf;

use clap::Parser;

/// 1-Wire bus supervisor: scans a bus, decodes per-device state changes into
/// events, and dispatches them to configured handlers.
#[derive(Debug, Parser)]
#[command(name = "owmasterd", version, about)]
pub struct Config {
    /// Path to the YAML configuration document.
    pub config_file: PathBuf,

    /// owserver host to connect to (overrides `owmaster.owserver_host`).
    #[arg(long, env = "OWMASTERD_OWSERVER_HOST")]
    pub owserver_host: Option<String>,

    /// owserver port to connect to (overrides `owmaster.owserver_port`).
    #[arg(long, env = "OWMASTERD_OWSERVER_PORT")]
    pub owserver_port: Option<u16>,

    /// Log format.
    #[arg(long, env = "OWMASTERD_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "OWMASTERD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Enable the Prometheus `/metrics` sink on this port.
    #[arg(long, env = "OWMASTERD_METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
