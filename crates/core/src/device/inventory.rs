// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device inventory (C3): id → device map, alias resolution, lost/seen
//! lifecycle. Grounded on `pyowmaster/__init__.py::DeviceInventory`.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::config::{Config, ConfigValue};
use crate::error::OwResult;
use crate::id::{is_owid, parse_target};

use super::factory::DeviceFactory;
use super::Device;

/// Per-device bookkeeping the inventory tracks outside the `Device` trait
/// object itself (mirrors the `lost`/`alias` attributes the original
/// attaches directly to each device instance).
struct Entry {
    device: Box<dyn Device>,
    alias: Option<String>,
    lost: bool,
}

pub struct DeviceInventory {
    factory: DeviceFactory,
    devices: HashMap<String, Option<Entry>>,
    aliases: HashMap<String, String>,
}

impl DeviceInventory {
    pub fn new(factory: DeviceFactory, config: &Config) -> Self {
        let mut inv = Self {
            factory,
            devices: HashMap::new(),
            aliases: HashMap::new(),
        };
        inv.refresh_config(config);
        inv
    }

    /// (Re)create any newly-configured devices and ask every existing one to
    /// refresh its config. Rebuilds the alias map from scratch each time to
    /// avoid carrying over stale entries.
    pub fn refresh_config(&mut self, config: &Config) {
        let devices_section = config.section("devices").and_then(ConfigValue::as_map);

        // `devices.<id>.alias: <name>` declares the alias on the device entry
        // itself; `devices.aliases.<id>: <name>` declares it out-of-line, for
        // devices whose config is otherwise empty.
        let mut configured_aliases: HashMap<String, String> = HashMap::new();
        if let Some(devices) = devices_section {
            for (dev_id, dev_cfg) in devices {
                if let Some(alias) = dev_cfg.as_map().and_then(|m| m.get("alias")).and_then(ConfigValue::as_str) {
                    configured_aliases.insert(dev_id.clone(), alias.to_owned());
                }
            }
            if let Some(ConfigValue::Map(alias_map)) = devices.get("aliases") {
                for (dev_id, alias_val) in alias_map {
                    if let Some(alias) = alias_val.as_str() {
                        configured_aliases.insert(dev_id.clone(), alias.to_owned());
                    }
                }
            }
        }

        let mut configured_ids: Vec<String> = Vec::new();
        if let Some(devices) = devices_section {
            configured_ids.extend(devices.keys().cloned());
        }
        configured_ids.extend(configured_aliases.keys().cloned());

        self.aliases.clear();

        let mut just_created = Vec::new();
        for dev_id in &configured_ids {
            if !is_owid(dev_id) {
                continue;
            }
            if !self.devices.contains_key(dev_id) {
                self.create_device(dev_id);
                just_created.push(dev_id.clone());
            }
        }

        let ids: Vec<String> = self.devices.keys().cloned().collect();
        for dev_id in ids {
            let Some(Some(entry)) = self.devices.get_mut(&dev_id) else { continue };
            if let Some(alias) = configured_aliases.get(&dev_id) {
                entry.alias = Some(alias.clone());
            }
            if just_created.contains(&dev_id) {
                continue;
            }
            if let Err(e) = entry.device.config(config) {
                warn!(device = %dev_id, error = %e, "failed to refresh device config");
            }
        }

        let ids: Vec<String> = self.devices.keys().cloned().collect();
        for dev_id in ids {
            let Some(Some(entry)) = self.devices.get_mut(&dev_id) else { continue };
            if let Some(alias) = entry.alias.clone() {
                self.add_alias(alias, &dev_id);
            }
        }
    }

    /// Find a device by ID (or path containing one), creating it via the
    /// factory if `create` is set and it isn't known yet.
    pub fn find(&mut self, id_or_path: &str, create: bool) -> Option<&mut Box<dyn Device>> {
        let dev_id = crate::id::owid_from_path(id_or_path)?;

        if !self.devices.contains_key(&dev_id) {
            if !create {
                return None;
            }
            self.create_device(&dev_id);
        }

        self.devices.get_mut(&dev_id).and_then(|e| e.as_mut()).map(|e| &mut e.device)
    }

    fn create_device(&mut self, dev_id: &str) {
        match self.factory.create(dev_id) {
            None => {
                self.devices.insert(dev_id.to_owned(), None);
            }
            Some(device) => {
                info!(device = %dev_id, family = %device.family(), "new device");
                self.devices.insert(dev_id.to_owned(), Some(Entry { device, alias: None, lost: false }));
            }
        }
    }

    fn add_alias(&mut self, alias: String, dev_id: &str) {
        if let Some(existing) = self.aliases.get(&alias) {
            if existing == dev_id {
                return;
            }
            warn!(alias, existing, dev_id, "duplicate alias, keeping first seen");
            return;
        }
        self.aliases.insert(alias, dev_id.to_owned());
    }

    /// Resolve an alias-or-ID plus optional `.<channel>` suffix, per
    /// `owidutil::parse_target`.
    pub fn resolve_target(&mut self, target: &str) -> OwResult<Option<(&mut Box<dyn Device>, Option<String>)>> {
        let (Some(alias_or_id), channel) = parse_target(target) else { return Ok(None) };

        let dev_id = if self.devices.contains_key(&alias_or_id) {
            alias_or_id
        } else {
            match self.aliases.get(&alias_or_id) {
                Some(id) => id.clone(),
                None => return Ok(None),
            }
        };

        Ok(self.devices.get_mut(&dev_id).and_then(|e| e.as_mut()).map(|e| (&mut e.device, channel)))
    }

    /// Mark `dev_id` as present (clearing `lost` with a log if it was),
    /// returning whether it transitioned from lost.
    pub fn mark_seen(&mut self, dev_id: &str) -> bool {
        if let Some(Some(entry)) = self.devices.get_mut(dev_id) {
            if entry.lost {
                entry.lost = false;
                warn!(device = %dev_id, "device back online");
                return true;
            }
        }
        false
    }

    /// Mark every known device not present in `seen` (a full-scan result)
    /// as lost, returning the newly-lost IDs.
    pub fn mark_missing(&mut self, seen: &[String]) -> Vec<String> {
        let mut newly_lost = Vec::new();
        for (dev_id, entry) in self.devices.iter_mut() {
            let Some(entry) = entry else { continue };
            if seen.contains(dev_id) {
                continue;
            }
            if !entry.lost {
                entry.lost = true;
                newly_lost.push(dev_id.clone());
            }
        }
        newly_lost
    }

    pub fn size(&self) -> usize {
        self.devices.values().filter(|e| e.is_some()).count()
    }

    pub fn ids(&self) -> Vec<String> {
        self.devices
            .iter()
            .filter(|(_, e)| e.is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn device_mut(&mut self, dev_id: &str) -> Option<&mut Box<dyn Device>> {
        self.devices.get_mut(dev_id).and_then(|e| e.as_mut()).map(|e| &mut e.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn refresh_config_creates_configured_devices() {
        let factory = DeviceFactory::new();
        let cfg = Config::from_yaml_str("devices:\n  29.AABBCCDDEEFF: {}\n").unwrap();
        let inv = DeviceInventory::new(factory, &cfg);
        assert_eq!(inv.size(), 1);
    }

    #[test]
    fn unsupported_family_still_tracked_as_unsupported() {
        let factory = DeviceFactory::new();
        let cfg = Config::from_yaml_str("devices:\n  FF.AABBCCDDEEFF: {}\n").unwrap();
        let inv = DeviceInventory::new(factory, &cfg);
        // Tracked in `devices` as None, so it isn't double-created on scan,
        // but doesn't count toward `size()`.
        assert_eq!(inv.size(), 0);
        assert!(inv.devices.contains_key("FF.AABBCCDDEEFF"));
    }

    #[test]
    fn mark_missing_flags_unseen_devices() {
        let factory = DeviceFactory::new();
        let cfg = Config::from_yaml_str("devices:\n  29.AABBCCDDEEFF: {}\n").unwrap();
        let mut inv = DeviceInventory::new(factory, &cfg);
        let lost = inv.mark_missing(&[]);
        assert_eq!(lost, vec!["29.AABBCCDDEEFF".to_owned()]);
    }
}
