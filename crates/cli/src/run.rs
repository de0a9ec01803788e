// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process lifecycle (C11): tracing setup, signal handling, and the
//! prepare/run split the teacher's `crates/cli/src/run.rs` uses to separate
//! "build everything that can fail" from "drive it until a shutdown signal".

use std::path::PathBuf;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::master::Master;

/// Initializes `tracing`/`tracing-subscriber`. Mirrors the teacher's
/// `init_tracing`: `RUST_LOG` wins if set and the CLI log level was left at
/// its default, otherwise the CLI-supplied level drives the filter. Safe to
/// call more than once (`try_init` swallows a "already set" error).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = if std::env::var("OWMASTERD_LOG_LEVEL").is_err() && config.log_level == "info" {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level))
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// Everything built before the daemon starts handling signals: the
/// orchestrator itself, the loaded config document (kept around for
/// `SIGHUP` reloads), and an optional bound metrics listener.
pub struct PreparedDaemon {
    master: Master,
    config_file: PathBuf,
    owmaster_config: owmaster_core::Config,
    metrics_listener: Option<tokio::net::TcpListener>,
}

/// Loads the config document, spawns the orchestrator, and binds the
/// metrics listener if requested. Fallible: owserver connectivity is not
/// checked here (the orchestrator retries that indefinitely once running),
/// but a malformed config document or an unavailable metrics port is.
pub async fn prepare(config: Config) -> anyhow::Result<PreparedDaemon> {
    init_tracing(&config);

    let owmaster_config = owmaster_core::Config::load(&config.config_file)?;

    let master = Master::spawn(
        owmaster_config.clone(),
        config.owserver_host.clone(),
        config.owserver_port,
        config.metrics_port,
    );

    let metrics_listener = match config.metrics_port {
        Some(port) => Some(tokio::net::TcpListener::bind(("0.0.0.0", port)).await?),
        None => None,
    };

    Ok(PreparedDaemon {
        master,
        config_file: config.config_file,
        owmaster_config,
        metrics_listener,
    })
}

impl PreparedDaemon {
    /// Serves metrics (if enabled) and blocks handling signals until a
    /// graceful shutdown is requested, returning the process exit code.
    pub async fn run(mut self) -> anyhow::Result<i32> {
        if let (Some(listener), Some(sink)) = (self.metrics_listener.take(), self.master.prometheus_sink()) {
            info!(addr = %listener.local_addr()?, "metrics listening");
            tokio::spawn(async move {
                if let Err(e) = axum::serve(listener, sink.router()).await {
                    error!(error = %e, "metrics server error");
                }
            });
        }

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sighup = signal(SignalKind::hangup())?;
        let mut sigusr1 = signal(SignalKind::user_defined1())?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                _ = sighup.recv() => {
                    info!("received SIGHUP, reloading configuration");
                    match self.owmaster_config.reload(&self.config_file) {
                        Ok(cfg) => {
                            self.owmaster_config = cfg;
                            self.master.refresh_config(&self.owmaster_config);
                        }
                        Err(e) => error!(error = %e, "config reload failed, keeping previous configuration"),
                    }
                }
                _ = sigusr1.recv() => {
                    self.master.dump_diagnostics();
                }
            }
        }

        let master = self.master;
        tokio::task::spawn_blocking(move || master.shutdown()).await?;
        Ok(0)
    }
}

pub async fn run(config: Config) -> anyhow::Result<i32> {
    prepare(config).await?.run().await
}
