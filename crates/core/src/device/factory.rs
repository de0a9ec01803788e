// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Family-code device registry (C3), grounded on
//! `pyowmaster/__init__.py::DeviceFactory`.

use std::collections::HashMap;

use super::busstats::BusStatsDevice;
use super::counter::CounterDevice;
use super::moat::MoatDevice;
use super::pio::PioDevice;
use super::temperature::TemperatureDevice;
use super::Device;

type Constructor = fn(&str) -> Box<dyn Device>;

/// Maps a two-hex-digit family code to the `Device` constructor for it.
/// Unregistered families are silently skipped at discovery time (§4.3 edge
/// case: "unknown family code").
pub struct DeviceFactory {
    types: HashMap<String, Constructor>,
}

impl DeviceFactory {
    pub fn new() -> Self {
        let mut types: HashMap<String, Constructor> = HashMap::new();

        for family in super::temperature::FAMILIES {
            types.insert((*family).to_owned(), construct_temperature as Constructor);
        }
        types.insert(super::counter::FAMILY.to_owned(), construct_counter as Constructor);
        types.insert(super::moat::FAMILY.to_owned(), construct_moat as Constructor);
        types.insert("12".to_owned(), construct_ds2406 as Constructor);
        types.insert("29".to_owned(), construct_ds2408 as Constructor);
        types.insert("3A".to_owned(), construct_ds2413 as Constructor);

        Self { types }
    }

    pub fn register(&mut self, family_code: impl Into<String>, ctor: Constructor) {
        self.types.insert(family_code.into(), ctor);
    }

    /// Create a device for `dev_id` (e.g. `29.AABBCCDDEEFF`). Returns `None`
    /// for an unregistered family code.
    pub fn create(&self, dev_id: &str) -> Option<Box<dyn Device>> {
        let family = dev_id.get(0..2)?;
        let ctor = self.types.get(family)?;
        Some(ctor(dev_id))
    }

    /// A standalone instance of the bus-statistics pseudo-device; not keyed
    /// by family code since it isn't a real slave.
    pub fn create_bus_stats(&self) -> Box<dyn Device> {
        Box::new(BusStatsDevice::new())
    }
}

impl Default for DeviceFactory {
    fn default() -> Self {
        Self::new()
    }
}

fn construct_temperature(dev_id: &str) -> Box<dyn Device> {
    let family = dev_id[0..2].to_owned();
    Box::new(TemperatureDevice::new(dev_id, family))
}

fn construct_counter(dev_id: &str) -> Box<dyn Device> {
    Box::new(CounterDevice::new(dev_id))
}

fn construct_moat(dev_id: &str) -> Box<dyn Device> {
    Box::new(MoatDevice::new(dev_id))
}

fn construct_ds2406(dev_id: &str) -> Box<dyn Device> {
    // The real channel count is read from the device's `channels` property
    // on first contact; 2 (the common A/B wiring) is used as the
    // provisional default until that read happens.
    Box::new(PioDevice::new(dev_id, "12", 2, true))
}

fn construct_ds2408(dev_id: &str) -> Box<dyn Device> {
    Box::new(PioDevice::new(dev_id, "29", 8, true))
}

fn construct_ds2413(dev_id: &str) -> Box<dyn Device> {
    Box::new(PioDevice::new(dev_id, "3A", 2, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_known_family() {
        let factory = DeviceFactory::new();
        let dev = factory.create("29.AABBCCDDEEFF").unwrap();
        assert_eq!(dev.family(), "29");
    }

    #[test]
    fn unknown_family_returns_none() {
        let factory = DeviceFactory::new();
        assert!(factory.create("FF.AABBCCDDEEFF").is_none());
    }
}
