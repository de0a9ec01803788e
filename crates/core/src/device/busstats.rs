// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus-statistics pseudo-device (C6), grounded on
//! `pyowmaster/device/stats.py::OwStatistics`.
//!
//! Not a real slave: polls owserver's own `/statistics` tree and republishes
//! each counter as a `Statistics` event, independent of the counter table in
//! [`crate::stats::Statistics`] (which tracks this daemon's own bus-call
//! timings, not the owserver-reported error counts).

use async_trait::async_trait;

use crate::config::Config;
use crate::error::OwResult;
use crate::event::{Event, EventKind};

use super::{Device, DeviceContext};

const ERRORS: &[&str] = &[
    "BUS_bit_errors",
    "BUS_byte_errors",
    "BUS_detect_errors",
    "BUS_echo_errors",
    "BUS_level_errors",
    "BUS_next_alarm_errors",
    "BUS_next_errors",
    "BUS_readin_data_errors",
    "BUS_status_errors",
    "BUS_tcsetattr_errors",
    "CRC16_errors",
    "CRC8_errors",
    "DS2480_level_docheck_errors",
    "DS2480_read_fd_isset",
    "DS2480_read_null",
    "DS2480_read_read",
    "NET_accept_errors",
    "NET_connection_errors",
    "NET_read_errors",
];

/// `(config_name, owserver_path)`. `CRC16_tries`/`CRC8_tries` live under
/// `errors/` on the wire despite the name; `read_tries` is the one
/// comma-separated multi-value counter (one entry per retry count bucket).
const TRIES: &[(&str, &str)] = &[("CRC16_tries", "errors/CRC16_tries"), ("CRC8_tries", "errors/CRC8_tries")];

pub struct BusStatsDevice;

impl BusStatsDevice {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BusStatsDevice {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Device for BusStatsDevice {
    fn id(&self) -> &str {
        "OwStatistics"
    }

    fn family(&self) -> &str {
        "pseudo"
    }

    fn config(&mut self, _config: &Config) -> OwResult<()> {
        Ok(())
    }

    async fn on_seen(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        for name in ERRORS {
            let data = ctx.bus.read(&format!("/statistics/errors/{name}"), ctx.stats).await?;
            let value: f64 = data.trim().parse().unwrap_or(0.0);
            emit(ctx, "error", name, value);
        }

        for (name, path) in TRIES {
            let data = ctx.bus.read(&format!("/statistics/{path}"), ctx.stats).await?;
            let value: f64 = data.trim().parse().unwrap_or(0.0);
            emit(ctx, "tries", name, value);
        }

        let read_tries = ctx.bus.read("/statistics/read/tries.ALL", ctx.stats).await?;
        for (n, entry) in read_tries.split(',').enumerate() {
            let Ok(value) = entry.trim().parse::<f64>() else { continue };
            emit(ctx, "tries", &format!("read_tries_{}", n + 1), value);
        }

        Ok(())
    }
}

fn emit(ctx: &mut DeviceContext<'_>, category: &str, name: &str, value: f64) {
    let event = Event::new(
        ctx.timestamp,
        None,
        EventKind::Statistics { category: category.to_owned(), name: name.to_owned(), value },
    );
    ctx.dispatcher.handle_event(event);
}
