// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dual counter engine (C6), family 1D (DS2423).
//!
//! Grounded on `pyowmaster/device/DS2423.py`. The custom AVR-slave variant
//! this project also supports can alarm on read; ordinary DS2423 parts
//! never alarm, so `on_alarm` simply re-reads to silence whatever triggered
//! it.

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{OwError, OwResult};
use crate::event::{Event, EventKind};

use super::{Device, DeviceContext};

pub const FAMILY: &str = "1D";
const CHANNEL_NAMES: [&str; 2] = ["A", "B"];

pub struct CounterDevice {
    id: String,
}

impl CounterDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    async fn read_counters(&self, ctx: &mut DeviceContext<'_>) -> OwResult<[u64; 2]> {
        let data = ctx.bus.read(&format!("/{}/counter.ALL", self.id), ctx.stats).await?;
        let mut values = [0u64; 2];
        for (i, part) in data.split(',').enumerate().take(2) {
            values[i] = part
                .trim()
                .parse()
                .map_err(|e| OwError::protocol(format!("counter.ALL not numeric: {e}")))?;
        }
        Ok(values)
    }
}

#[async_trait]
impl Device for CounterDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &str {
        FAMILY
    }

    fn config(&mut self, _config: &Config) -> OwResult<()> {
        Ok(())
    }

    async fn on_seen(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        let values = self.read_counters(ctx).await?;
        for (name, value) in CHANNEL_NAMES.iter().zip(values) {
            let event = Event::new(
                ctx.timestamp,
                Some(self.id.clone()),
                EventKind::Counter { channel: (*name).to_owned(), value },
            );
            ctx.dispatcher.handle_event(event);
        }
        Ok(())
    }

    async fn on_alarm(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        self.read_counters(ctx).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_are_a_and_b() {
        assert_eq!(CHANNEL_NAMES, ["A", "B"]);
    }
}
