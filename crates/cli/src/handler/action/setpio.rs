// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sets an output PIO channel. Grounded on
//! `pyowmaster/event/action/setpio.py::SetPioAction`.

use std::sync::{Arc, Mutex};

use tracing::{debug, warn};

use owmaster_core::device::inventory::DeviceInventory;
use owmaster_core::event::Event;

pub struct SetPioAction {
    target: String,
    value: bool,
}

impl SetPioAction {
    pub fn new(target: impl Into<String>, value: bool) -> Self {
        Self { target: target.into(), value }
    }

    pub fn run(&self, _event: &Event, inventory: &Arc<Mutex<DeviceInventory>>) {
        #[allow(clippy::unwrap_used)]
        let mut inv = inventory.lock().unwrap_or_else(|e| e.into_inner());

        let resolved = match inv.resolve_target(&self.target) {
            Ok(Some((device, Some(channel)))) => Some((device, channel)),
            Ok(Some((_, None))) => {
                warn!(target = %self.target, "setpio action target has no channel");
                None
            }
            Ok(None) => {
                warn!(target = %self.target, "setpio action target not found");
                None
            }
            Err(e) => {
                warn!(target = %self.target, error = %e, "failed to resolve setpio target");
                None
            }
        };

        let Some((device, channel)) = resolved else { return };

        match device.set_output(&channel, self.value) {
            Ok(()) => debug!(target = %self.target, value = self.value, "set output"),
            Err(e) => warn!(target = %self.target, error = %e, "failed to set output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use owmaster_core::config::Config;
    use owmaster_core::device::factory::DeviceFactory;
    use owmaster_core::event::EventKind;

    #[test]
    fn logs_and_does_nothing_when_target_unknown() {
        let cfg = Config::from_yaml_str("devices: {}\n").unwrap();
        let inventory = Arc::new(Mutex::new(DeviceInventory::new(DeviceFactory::new(), &cfg)));
        let action = SetPioAction::new("nonexistent.A", true);
        action.run(&Event::new(0.0, None, EventKind::Config), &inventory);
    }

    #[test]
    fn sets_output_on_resolved_target() {
        let cfg = Config::from_yaml_str("devices:\n  29.AAAAAAAAAAAA: {}\n").unwrap();
        let inventory = Arc::new(Mutex::new(DeviceInventory::new(DeviceFactory::new(), &cfg)));
        let action = SetPioAction::new("29.AAAAAAAAAAAA.0", true);
        action.run(&Event::new(0.0, None, EventKind::Config), &inventory);
    }
}
