// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Temperature sensor engine (C6), families 10/28/22/3B/42.
//!
//! Grounded on `pyowmaster/device/DS1820.py`. Polling is skipped when the
//! device participates in the master's simultaneous-conversion broadcast
//! (the default); see `crates/cli/src/master.rs`.

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{OwError, OwResult};
use crate::event::{Event, EventKind, TemperatureUnit};

use super::{Device, DeviceContext};

pub const FAMILIES: &[&str] = &["10", "28", "22", "3B", "42"];

pub struct TemperatureDevice {
    id: String,
    family: String,
    /// `false` when this device has opted out of the master's simultaneous
    /// broadcast and should poll `/temperature` itself on every scan.
    simultaneous: bool,
    last: Option<f64>,
}

impl TemperatureDevice {
    pub fn new(id: impl Into<String>, family: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            family: family.into(),
            simultaneous: true,
            last: None,
        }
    }

    pub async fn read_temperature(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        let data = ctx.bus.read(&format!("/{}/temperature", self.id), ctx.stats).await?;
        let temp: f64 = data
            .trim()
            .parse()
            .map_err(|e| OwError::protocol(format!("temperature not numeric: {e}")))?;

        self.last = Some(temp);
        let event = Event::new(
            ctx.timestamp,
            Some(self.id.clone()),
            EventKind::Temperature { value: temp, unit: TemperatureUnit::C },
        );
        ctx.dispatcher.handle_event(event);
        Ok(())
    }
}

#[async_trait]
impl Device for TemperatureDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &str {
        &self.family
    }

    fn config(&mut self, config: &Config) -> OwResult<()> {
        let key = crate::config::path(&["devices", self.family.as_str(), "simultaneous"]);
        if let Some(v) = config.get(&key).and_then(|v| v.as_bool()) {
            self.simultaneous = v;
        }
        Ok(())
    }

    async fn on_seen(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        if self.simultaneous {
            // The master already broadcast a conversion and will feed this
            // device's reading in via `read_temperature` directly.
            return Ok(());
        }
        self.read_temperature(ctx).await
    }

    async fn on_alarm(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        tracing::debug!(device = %self.id, "silencing temperature alarm");
        ctx.bus.write(&format!("/{}/templow", self.id), "-80", ctx.stats).await?;
        ctx.bus.write(&format!("/{}/temphigh", self.id), "125", ctx.stats).await?;
        Ok(())
    }

    fn simultaneous_tag(&self) -> Option<&'static str> {
        self.simultaneous.then_some("temperature")
    }

    async fn simultaneous_read(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        self.read_temperature(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_device_defaults_to_simultaneous_mode() {
        let dev = TemperatureDevice::new("28.ABCDEF000000", "28");
        assert!(dev.simultaneous);
        assert!(dev.last.is_none());
    }
}
