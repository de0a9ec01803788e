// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Action handler (C8): reacts to PIO events and runs configured reactions.
//!
//! Grounded on `pyowmaster/event/actionhandler.py::ActionEventHandler`,
//! which only reacts to PIO events (the original's own comment: "XXX: Only
//! PIO events"). Configuration is walked per device/channel, keyed by the
//! lowercased PIO value string the channel can emit ("on", "off",
//! "trigged") rather than by event kind. The original works around a
//! PyYAML 1.1 quirk where bare `on`/`off` keys parse as booleans; our
//! `serde_yaml` loader follows the YAML 1.2 Core Schema and keeps them as
//! plain strings, so no such workaround is needed here.

pub mod expr;
pub mod setpio;
pub mod shell;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::warn;

use owmaster_core::config::{Config, ConfigValue};
use owmaster_core::device::inventory::DeviceInventory;
use owmaster_core::event::{Event, EventKind};

use self::expr::{Context as ExprContext, Expr, Value as ExprValue};
use self::setpio::SetPioAction;
use self::shell::ShellAction;
use super::threaded::Delegate;

enum ActionRun {
    SetPio(SetPioAction),
    Shell(ShellAction),
}

impl ActionRun {
    fn run(&self, event: &Event, inventory: &Arc<Mutex<DeviceInventory>>) {
        match self {
            ActionRun::SetPio(a) => a.run(event, inventory),
            ActionRun::Shell(a) => a.run(event),
        }
    }
}

/// One configured reaction, plus its own optional gating conditional and
/// `since_last_action_run` bookkeeping.
struct ActionEntry {
    when: Option<Expr>,
    run: ActionRun,
    last_ran: Option<f64>,
}

/// Compiled configuration for one `devices.<id>.channels.<ch>.<on|off|trigged>`
/// entry.
struct EventTypeConfig {
    when: Option<Expr>,
    include_reset: bool,
    actions: Vec<ActionEntry>,
    last_occurred: Option<f64>,
    last_ran: Option<f64>,
}

type ConfigKey = (String, String, String);

/// Reacts to `EventKind::Pio` events by evaluating configured conditionals
/// and running the actions (set-output, shell) that qualify. Intended to run
/// behind a [`super::threaded::ThreadedHandler`] since actions may block on
/// process spawning or bus writes.
pub struct ActionHandler {
    inventory: Arc<Mutex<DeviceInventory>>,
    by_channel: HashMap<ConfigKey, EventTypeConfig>,
    aliases: HashMap<String, String>,
}

impl ActionHandler {
    pub fn new(inventory: Arc<Mutex<DeviceInventory>>) -> Self {
        Self {
            inventory,
            by_channel: HashMap::new(),
            aliases: HashMap::new(),
        }
    }

    /// Walk every configured device's `channels` section and compile the
    /// per-value reaction entries it declares, replacing any previously
    /// loaded configuration. Malformed entries are logged and skipped rather
    /// than aborting the whole reload.
    pub fn load_config(&mut self, config: &Config) {
        self.by_channel.clear();
        self.aliases.clear();

        let Some(ConfigValue::Map(devices)) = config.section("devices") else {
            return;
        };

        for (dev_id, dev_cfg) in devices {
            let Some(dev_map) = dev_cfg.as_map() else { continue };

            if let Some(alias) = dev_map.get("alias").and_then(ConfigValue::as_str) {
                self.aliases.insert(alias.to_owned(), dev_id.clone());
            }

            let Some(ConfigValue::Map(channels)) = dev_map.get("channels") else { continue };
            for (ch_name, ch_cfg) in channels {
                let Some(ch_map) = ch_cfg.as_map() else { continue };
                for value in ["on", "off", "trigged"] {
                    let Some(entry_cfg) = ch_map.get(value) else { continue };
                    match compile_event_type(entry_cfg) {
                        Ok(compiled) => {
                            self.by_channel
                                .insert((dev_id.clone(), ch_name.clone(), value.to_owned()), compiled);
                        }
                        Err(e) => warn!(
                            device = %dev_id,
                            channel = %ch_name,
                            value,
                            error = %e,
                            "skipping malformed action config"
                        ),
                    }
                }
            }
        }
    }

    fn handle_event_blocking(&mut self, event: &Event) {
        let EventKind::Pio { channel, value } = &event.kind else { return };
        let Some(dev_id) = event.device_id.clone() else { return };
        let key = (dev_id, channel.clone(), value.as_str().to_lowercase());

        let Self { inventory, by_channel, aliases } = self;

        let Some(entry) = by_channel.get_mut(&key) else { return };

        if event.is_reset && !entry.include_reset {
            return;
        }

        let ctx = build_context(&*aliases, event, entry.last_occurred, entry.last_ran);
        entry.last_occurred = Some(event.timestamp);

        let satisfied = entry.when.as_ref().map_or(true, |w| w.eval_bool(&ctx));
        if !satisfied {
            return;
        }
        entry.last_ran = Some(event.timestamp);

        for action in &mut entry.actions {
            let mut action_ctx = ctx.clone();
            let since_action = action
                .last_ran
                .map_or(ExprValue::Null, |t| ExprValue::Num(event.timestamp - t));
            action_ctx.set("since_last_action_run", since_action);

            let qualifies = action.when.as_ref().map_or(true, |w| w.eval_bool(&action_ctx));
            if !qualifies {
                continue;
            }
            action.last_ran = Some(event.timestamp);
            action.run.run(event, &*inventory);
        }
    }
}

impl Delegate for ActionHandler {
    fn handle_event(&mut self, event: &Event) {
        self.handle_event_blocking(event);
    }
}

fn build_context(
    aliases: &HashMap<String, String>,
    event: &Event,
    last_occurred: Option<f64>,
    last_ran: Option<f64>,
) -> ExprContext {
    let mut ctx = ExprContext::new();

    if let EventKind::Pio { value, .. } = &event.kind {
        ctx.set_event_field("value", ExprValue::Str(value.as_str().to_lowercase()));
    }
    ctx.set_event_field("timestamp", ExprValue::Num(event.timestamp));
    ctx.set_event_field("is_reset", ExprValue::Bool(event.is_reset));

    ctx.set(
        "since_last_event",
        last_occurred.map_or(ExprValue::Null, |t| ExprValue::Num(event.timestamp - t)),
    );
    ctx.set(
        "since_last_run",
        last_ran.map_or(ExprValue::Null, |t| ExprValue::Num(event.timestamp - t)),
    );

    for alias in aliases.keys() {
        ctx.set_device(alias.clone(), true);
    }
    if let Some(id) = &event.device_id {
        ctx.set_device(id.clone(), true);
    }

    ctx
}

fn compile_event_type(entry_cfg: &ConfigValue) -> Result<EventTypeConfig, String> {
    let (when_str, include_reset, action_specs): (Option<&str>, bool, Vec<&ConfigValue>) = match entry_cfg {
        ConfigValue::Map(m) if m.contains_key("actions") => {
            let when_str = m.get("when").and_then(ConfigValue::as_str);
            let include_reset = m.get("include_reset").and_then(ConfigValue::as_bool).unwrap_or(false);
            let specs = match m.get("actions") {
                Some(ConfigValue::Seq(seq)) => seq.iter().collect(),
                Some(single) => vec![single],
                None => Vec::new(),
            };
            (when_str, include_reset, specs)
        }
        ConfigValue::Seq(seq) => (None, false, seq.iter().collect()),
        single => (None, false, vec![single]),
    };

    let when = when_str.map(expr::parse).transpose().map_err(|e| e.to_string())?;

    let mut actions = Vec::with_capacity(action_specs.len());
    for spec in action_specs {
        actions.push(compile_action_entry(spec)?);
    }

    Ok(EventTypeConfig {
        when,
        include_reset,
        actions,
        last_occurred: None,
        last_ran: None,
    })
}

fn compile_action_entry(spec: &ConfigValue) -> Result<ActionEntry, String> {
    let when = spec
        .as_map()
        .and_then(|m| m.get("when"))
        .and_then(ConfigValue::as_str)
        .map(expr::parse)
        .transpose()
        .map_err(|e| e.to_string())?;
    let run = build_action(spec)?;
    Ok(ActionEntry { when, run, last_ran: None })
}

/// Parses either the long form `{action: "<module>.<method>", ...options}`
/// or the single-key shorthand `<module>.<method>: <value>`.
fn build_action(spec: &ConfigValue) -> Result<ActionRun, String> {
    let map = spec.as_map().ok_or_else(|| "action entry must be a mapping".to_owned())?;

    if let Some(full) = map.get("action").and_then(ConfigValue::as_str) {
        let (module, method) = split_action_name(full)?;
        return build_from_parts(module, method, map, None);
    }

    let mut rest = map.iter().filter(|(k, _)| k.as_str() != "when");
    if let (Some((full, value)), None) = (rest.next(), rest.next()) {
        let (module, method) = split_action_name(full)?;
        return build_from_parts(module, method, map, Some(value));
    }

    Err("action entry missing 'action' key and is not single-key shorthand".into())
}

fn split_action_name(full: &str) -> Result<(&str, &str), String> {
    full.split_once('.')
        .ok_or_else(|| format!("action name '{full}' must be '<module>.<method>'"))
}

fn build_from_parts(
    module: &str,
    method: &str,
    map: &std::collections::BTreeMap<String, ConfigValue>,
    shorthand: Option<&ConfigValue>,
) -> Result<ActionRun, String> {
    match module {
        "setpio" => {
            let target = map
                .get("target")
                .and_then(ConfigValue::as_str)
                .or_else(|| shorthand.and_then(ConfigValue::as_str))
                .ok_or_else(|| "setpio action requires a target".to_owned())?;
            let value = match method {
                "on" => true,
                "off" => false,
                other => return Err(format!("setpio has no method '{other}'")),
            };
            Ok(ActionRun::SetPio(SetPioAction::new(target, value)))
        }
        "shell" => {
            let command = map
                .get("command")
                .and_then(ConfigValue::as_str)
                .or_else(|| shorthand.and_then(ConfigValue::as_str))
                .ok_or_else(|| "shell action requires a command".to_owned())?;
            Ok(ActionRun::Shell(ShellAction::new(command)))
        }
        other => Err(format!("unknown action module '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use owmaster_core::device::factory::DeviceFactory;
    use owmaster_core::event::PioValue;

    fn inventory_with(yaml: &str) -> Arc<Mutex<DeviceInventory>> {
        let cfg = Config::from_yaml_str(yaml).unwrap();
        let inv = DeviceInventory::new(DeviceFactory::new(), &cfg);
        Arc::new(Mutex::new(inv))
    }

    fn pio_event(dev_id: &str, channel: &str, value: PioValue, ts: f64) -> Event {
        Event::new(ts, Some(dev_id.to_owned()), EventKind::Pio { channel: channel.to_owned(), value })
    }

    #[test]
    fn shorthand_setpio_config_compiles_and_runs() {
        let yaml = "
devices:
  29.AAAAAAAAAAAA:
    channels:
      A:
        on:
          setpio.on: 29.AAAAAAAAAAAA.B
";
        let cfg = Config::from_yaml_str(yaml).unwrap();
        let inventory = inventory_with(yaml);
        let mut handler = ActionHandler::new(inventory);
        handler.load_config(&cfg);

        assert_eq!(handler.by_channel.len(), 1);

        let ev = pio_event("29.AAAAAAAAAAAA", "A", PioValue::On, 10.0);
        handler.handle_event_blocking(&ev);

        let entry = handler.by_channel.values().next().unwrap();
        assert_eq!(entry.last_ran, Some(10.0));
    }

    #[test]
    fn when_conditional_gates_action() {
        let yaml = "
devices:
  29.AAAAAAAAAAAA:
    channels:
      A:
        trigged:
          when: \"since_last_event ?? 100 > 5\"
          actions:
            - shell.run: \"true\"
";
        let cfg = Config::from_yaml_str(yaml).unwrap();
        let inventory = inventory_with(yaml);
        let mut handler = ActionHandler::new(inventory);
        handler.load_config(&cfg);

        let ev = pio_event("29.AAAAAAAAAAAA", "A", PioValue::Trigged, 1.0);
        handler.handle_event_blocking(&ev);
        let entry = handler.by_channel.values().next().unwrap();
        assert_eq!(entry.last_ran, Some(1.0));
    }

    #[test]
    fn reset_events_are_skipped_unless_opted_in() {
        let yaml = "
devices:
  29.AAAAAAAAAAAA:
    channels:
      A:
        on:
          setpio.on: 29.AAAAAAAAAAAA.B
";
        let cfg = Config::from_yaml_str(yaml).unwrap();
        let inventory = inventory_with(yaml);
        let mut handler = ActionHandler::new(inventory);
        handler.load_config(&cfg);

        let ev = pio_event("29.AAAAAAAAAAAA", "A", PioValue::On, 10.0).with_reset(true);
        handler.handle_event_blocking(&ev);

        let entry = handler.by_channel.values().next().unwrap();
        assert_eq!(entry.last_ran, None);
    }
}
