// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device engines (C3–C6): the per-family behavior that turns bus reads into
//! [`Event`]s, plus the inventory/factory that own device lifecycle.

pub mod busstats;
pub mod counter;
pub mod factory;
pub mod inventory;
pub mod moat;
pub mod pio;
pub mod temperature;

use async_trait::async_trait;

use crate::bus::Bus;
use crate::config::Config;
use crate::error::OwResult;
use crate::event::EventDispatcher;
use crate::stats::Statistics;

/// Everything a device callback needs: the bus connection (for on-demand
/// reads/writes beyond what a combined scan already fetched), the running
/// statistics table, and the dispatcher events are emitted through.
pub struct DeviceContext<'a> {
    pub bus: &'a mut Bus,
    pub stats: &'a mut Statistics,
    pub dispatcher: &'a mut EventDispatcher,
    pub timestamp: f64,
}

/// Common behavior implemented by every supported 1-Wire family.
///
/// Grounded on `pyowmaster/device/base.py::OwDevice` (not itself part of the
/// retrieval pack's Python sources reproduced here, but the shape inferred
/// from every subclass: `config`, `on_seen`, `on_alarm`).
#[async_trait]
pub trait Device: Send {
    fn id(&self) -> &str;
    fn family(&self) -> &str;

    /// Apply or refresh configuration: channel modes, aliases, thresholds.
    /// Called once at discovery and again on every config reload.
    fn config(&mut self, config: &Config) -> OwResult<()>;

    /// Called on every scan pass the device is enumerated in. Devices
    /// without alarm support (or that otherwise poll) do their work here.
    async fn on_seen(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()>;

    /// Called when the device appears in the bus's `/alarm` directory.
    /// Default no-op for devices that never alarm.
    async fn on_alarm(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        let _ = ctx;
        Ok(())
    }

    /// Control an output channel. Only meaningful for devices with output
    /// capable channels (PIO, MoaT port); others return a configuration
    /// error.
    fn set_output(&mut self, channel: &str, value: bool) -> OwResult<()> {
        let _ = (channel, value);
        Err(crate::error::OwError::configuration(format!(
            "device {} has no output channels",
            self.id()
        )))
    }

    /// Which simultaneous-conversion batch (if any) this device wants to
    /// join on a full scan. Only `"temperature"` is understood by the
    /// orchestrator; any other value is a configuration error at scan time.
    fn simultaneous_tag(&self) -> Option<&'static str> {
        None
    }

    /// Invoked by the orchestrator ~1s after broadcasting the simultaneous
    /// conversion this device opted into, in place of `on_seen` for that
    /// scan. Default no-op for devices that never opt in.
    async fn simultaneous_read(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        let _ = ctx;
        Ok(())
    }
}
