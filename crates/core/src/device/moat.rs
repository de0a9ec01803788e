// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composite multi-channel slave engine (C5), family F0 ("MoaT": a custom
//! AVR-based 1-Wire slave exposing dynamically-typed channel groups).
//!
//! Grounded on `pyowmaster/device/MoaT.py`. Topology (which channel types
//! and how many of each) is discovered from the device itself rather than
//! from static configuration, so initialization is deferred to the first
//! `on_seen`/`on_alarm` call, once a [`DeviceContext`] with bus access is
//! available.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::{Config, ConfigValue, KeySegment};
use crate::error::{OwError, OwResult};
use crate::event::{Event, EventKind, PioValue};

use super::pio::parse_pio_mode;
use super::{Device, DeviceContext};

pub const FAMILY: &str = "F0";

const ADC_MIN: i64 = 0;
const ADC_MAX: i64 = 65535;

#[derive(Debug, Clone)]
struct AdcState {
    name: String,
    low: i64,
    high: i64,
    guess: bool,
}

enum MoatChannel {
    Port { mode: u8, disabled: bool, value: Option<u32> },
    Count { disabled: bool },
    Adc {
        disabled: bool,
        states: Vec<AdcState>,
        current_state: Option<String>,
        value: i64,
        low_threshold: i64,
        high_threshold: i64,
    },
}

struct Channel {
    name: String,
    ch_type: String,
    ch_num: usize,
    kind: MoatChannel,
}

pub struct MoatDevice {
    id: String,
    device_name: String,
    channels: BTreeMap<String, Channel>,
    combined_read_supported: Vec<String>,
    ignore_next_silent_alarm: bool,
    initialized: bool,
    dev_cfg: Option<Config>,
}

impl MoatDevice {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            device_name: String::new(),
            channels: BTreeMap::new(),
            combined_read_supported: Vec::new(),
            ignore_next_silent_alarm: false,
            initialized: false,
            dev_cfg: None,
        }
    }

    fn channel_config(&self, name: &str) -> Option<&ConfigValue> {
        let cfg = self.dev_cfg.as_ref()?;
        cfg.get(&[
            KeySegment::from("devices"),
            KeySegment::from(vec![self.id.as_str(), FAMILY]),
            KeySegment::from(name),
        ])
    }

    fn channel_mode(&self, name: &str) -> String {
        match self.channel_config(name) {
            Some(ConfigValue::String(s)) => s.clone(),
            Some(ConfigValue::Map(m)) => m
                .get("mode")
                .and_then(ConfigValue::as_str)
                .map(str::to_owned)
                .unwrap_or_else(|| "input momentary".to_owned()),
            _ => "input momentary".to_owned(),
        }
    }

    fn channel_disabled(&self, name: &str) -> bool {
        matches!(self.channel_config(name), Some(ConfigValue::Bool(false)))
    }

    fn adc_states(&self, name: &str) -> Vec<AdcState> {
        let Some(cfg) = self.dev_cfg.as_ref() else { return Vec::new() };
        let Some(states_val) = cfg.get(&[
            KeySegment::from("devices"),
            KeySegment::from(vec![self.id.as_str(), FAMILY]),
            KeySegment::from(vec!["adc", name]),
            KeySegment::from("states"),
        ]) else {
            return Vec::new();
        };

        let Some(map) = states_val.as_map() else { return Vec::new() };
        let mut states: Vec<AdcState> = map
            .iter()
            .map(|(state_name, v)| {
                let m = v.as_map();
                let low = m.and_then(|m| m.get("low")).and_then(ConfigValue::as_f64).unwrap_or(ADC_MIN as f64) as i64;
                let high = m.and_then(|m| m.get("high")).and_then(ConfigValue::as_f64).unwrap_or(ADC_MAX as f64) as i64;
                let guess = m.and_then(|m| m.get("guess")).and_then(ConfigValue::as_bool).unwrap_or(true);
                AdcState { name: state_name.clone(), low, high, guess }
            })
            .collect();
        states.sort_by_key(|s| s.low);
        states
    }

    fn get_state_entry<'a>(states: &'a [AdcState], value: i64) -> Option<&'a AdcState> {
        states.iter().find(|s| value >= s.low && value <= s.high)
    }

    fn guess_state_entry<'a>(states: &'a [AdcState], current: Option<&str>, crossed: char) -> Option<&'a AdcState> {
        let idx = states.iter().position(|s| Some(s.name.as_str()) == current)?;
        if !states[idx].guess {
            return None;
        }
        match crossed {
            '-' => states.get(idx.saturating_sub(1)),
            '+' => states.get((idx + 1).min(states.len() - 1)),
            _ => None,
        }
    }

    async fn init_channels(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        self.device_name = ctx.bus.read(&format!("/{}/config/name", self.id), ctx.stats).await?.trim().to_owned();
        let types = ctx.bus.read(&format!("/{}/config/types", self.id), ctx.stats).await?;

        self.combined_read_supported.clear();
        let mut seen = Vec::new();

        for line in types.lines() {
            let Some((ch_type, count_str)) = line.split_once('=') else { continue };
            let count: usize = count_str.trim().parse().unwrap_or(0);
            if !matches!(ch_type, "port" | "count" | "adc") {
                continue;
            }
            if matches!(ch_type, "port" | "adc") && !self.combined_read_supported.contains(&ch_type.to_owned()) {
                self.combined_read_supported.push(ch_type.to_owned());
            }

            for n in 1..=count {
                let name = format!("{ch_type}.{n}");
                seen.push(name.clone());
                if self.channels.contains_key(&name) {
                    continue;
                }

                let disabled = self.channel_disabled(&name);
                let kind = match ch_type {
                    "port" => MoatChannel::Port { mode: parse_pio_mode(&self.channel_mode(&name)), disabled, value: None },
                    "count" => MoatChannel::Count { disabled },
                    "adc" => MoatChannel::Adc {
                        disabled,
                        states: self.adc_states(&name),
                        current_state: None,
                        value: 0,
                        low_threshold: ADC_MAX,
                        high_threshold: ADC_MIN,
                    },
                    _ => unreachable!(),
                };

                self.channels.insert(name.clone(), Channel { name: name.clone(), ch_type: ch_type.to_owned(), ch_num: n, kind });
            }
        }

        self.channels.retain(|name, _| seen.contains(name));

        let combined = self.read_combined(ctx).await?;
        let names: Vec<String> = self.channels.keys().cloned().collect();
        for name in names {
            let value = combined.get(&name).copied();
            self.init_channel(&name, value, ctx).await?;
        }

        self.ignore_next_silent_alarm = true;
        self.initialized = true;
        Ok(())
    }

    async fn read_combined(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<BTreeMap<String, i64>> {
        let mut out = BTreeMap::new();
        let types = self.combined_read_supported.clone();
        for ch_type in types {
            let attr = if ch_type == "port" { "ports" } else { "adcs" };
            let data = ctx.bus.read(&format!("/{}/{}", self.id, attr), ctx.stats).await?;
            for (n, v) in data.split(',').enumerate() {
                if let Ok(value) = v.trim().parse::<i64>() {
                    out.insert(format!("{ch_type}.{}", n + 1), value);
                }
            }
        }
        Ok(out)
    }

    async fn init_channel(&mut self, name: &str, combined_value: Option<i64>, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        let id = self.id.clone();
        let Some(ch) = self.channels.get_mut(name) else { return Ok(()) };
        match &mut ch.kind {
            MoatChannel::Port { mode, value, .. } => {
                let v = combined_value.unwrap_or(0) as u32;
                *value = Some(v);
                let is_toggle = mode_is_input_toggle(*mode);
                let is_output = mode_is_output(*mode);
                if is_toggle || is_output {
                    let active_high = mode_is_active_high(*mode);
                    let bit = (v & 1) != 0;
                    let pv = if bit == active_high { PioValue::On } else { PioValue::Off };
                    emit_pio(ctx, &id, name, pv, true);
                }
            }
            MoatChannel::Count { .. } => {}
            MoatChannel::Adc { states, current_state, value, low_threshold, high_threshold, disabled, .. } => {
                *value = combined_value.unwrap_or(0);
                if !states.is_empty() {
                    if let Some(entry) = Self::get_state_entry(states, *value) {
                        *current_state = Some(entry.name.clone());
                        *low_threshold = entry.low;
                        *high_threshold = entry.high;
                        emit_pio(ctx, &id, name, PioValue::State(entry.name.clone()), true);
                    }
                } else if !*disabled {
                    *low_threshold = ADC_MAX;
                    *high_threshold = ADC_MIN;
                }
                let write = format!("{},{}", *low_threshold, *high_threshold);
                ctx.bus.write(&format!("/{}/{}", id, name), &write, ctx.stats).await?;
            }
        }
        Ok(())
    }
}

fn mode_is_output(mode: u8) -> bool {
    mode & 0b0_0001 == 0b0_0001
}
fn mode_is_input_toggle(mode: u8) -> bool {
    mode & 0b0_1010 == 0b0_1010
}
fn mode_is_active_high(mode: u8) -> bool {
    mode & 0b1_0000 == 0b1_0000
}

fn emit_pio(ctx: &mut DeviceContext<'_>, id: &str, channel: &str, value: PioValue, is_reset: bool) {
    let event = Event::new(ctx.timestamp, Some(id.to_owned()), EventKind::Pio { channel: channel.to_owned(), value }).with_reset(is_reset);
    ctx.dispatcher.handle_event(event);
}

#[async_trait]
impl Device for MoatDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn family(&self) -> &str {
        FAMILY
    }

    fn config(&mut self, config: &Config) -> OwResult<()> {
        self.dev_cfg = Some(config.clone());
        self.initialized = false;
        Ok(())
    }

    async fn on_seen(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        if !self.initialized {
            self.init_channels(ctx).await?;
            return Ok(());
        }

        let combined = self.read_combined(ctx).await?;
        let names: Vec<String> = self.channels.keys().cloned().collect();
        for name in names {
            let id = self.id.clone();
            let Some(ch) = self.channels.get_mut(&name) else { continue };
            match &mut ch.kind {
                MoatChannel::Count { disabled } => {
                    if *disabled {
                        continue;
                    }
                    let value = ctx.bus.read(&format!("/{}/{}", id, name), ctx.stats).await?;
                    let value: u64 = value.trim().parse().unwrap_or(0);
                    let event = Event::new(ctx.timestamp, Some(id), EventKind::Counter { channel: name.clone(), value });
                    ctx.dispatcher.handle_event(event);
                }
                MoatChannel::Adc { disabled, states, current_state, value, .. } => {
                    if *disabled {
                        continue;
                    }
                    let Some(v) = combined.get(&name).copied() else { continue };
                    *value = v;
                    if states.is_empty() {
                        let event = Event::new(ctx.timestamp, Some(id), EventKind::Adc { channel: name.clone(), value: v as u32 });
                        ctx.dispatcher.handle_event(event);
                    } else if let Some(entry) = Self::get_state_entry(states, v) {
                        if current_state.as_deref() != Some(entry.name.as_str()) {
                            *current_state = Some(entry.name.clone());
                            // A silent state transition means our polling
                            // raced an alarm that already reset; suppress
                            // the alarm's duplicate emission.
                            emit_pio(ctx, &id, &name, PioValue::State(entry.name.clone()), false);
                        }
                    }
                }
                MoatChannel::Port { .. } => {}
            }
        }
        Ok(())
    }

    async fn on_alarm(&mut self, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        if !self.initialized {
            self.init_channels(ctx).await?;
            return Ok(());
        }

        let sources = ctx.bus.read(&format!("/{}/alarm/sources", self.id), ctx.stats).await?;
        let ignore_silent = self.ignore_next_silent_alarm;
        self.ignore_next_silent_alarm = false;

        if sources.trim().is_empty() {
            if !ignore_silent {
                tracing::warn!(device = %self.id, "device alarmed but empty sources");
            }
            return Ok(());
        }

        let mut source_list: Vec<&str> = sources.split(',').map(str::trim).collect();
        if let Some(pos) = source_list.iter().position(|s| *s == "status") {
            source_list.remove(pos);
            source_list.insert(0, "status");
        }

        for port_type in source_list {
            let ports = ctx.bus.read(&format!("/{}/alarm/{}", self.id, port_type), ctx.stats).await?;
            if ports.trim().is_empty() {
                tracing::warn!(device = %self.id, port_type, "device alarmed on type but no channels alarmed");
                continue;
            }

            for port_no in ports.split(',') {
                let mut port_no = port_no.trim();
                let mut adc_thresh = None;
                if let Some(c) = port_no.chars().next() {
                    if c == '-' || c == '+' {
                        adc_thresh = Some(c);
                        port_no = &port_no[1..];
                    }
                }

                if port_type == "status" {
                    if !self.handle_status_alarm(port_no, ctx).await? {
                        return Ok(());
                    }
                    continue;
                }

                let ch_name = format!("{port_type}.{port_no}");
                self.handle_channel_alarm(&ch_name, adc_thresh, ctx).await?;
            }
        }

        Ok(())
    }

    fn set_output(&mut self, channel: &str, value: bool) -> OwResult<()> {
        let Some(ch) = self.channels.get(channel) else {
            return Err(OwError::configuration(format!("unknown MoaT channel {channel}")));
        };
        match &ch.kind {
            MoatChannel::Port { .. } => Ok(()),
            _ => Err(OwError::configuration(format!("channel {channel} does not support output control"))),
        }
    }
}

impl MoatDevice {
    async fn handle_status_alarm(&mut self, status_name: &str, ctx: &mut DeviceContext<'_>) -> OwResult<bool> {
        let val = ctx.bus.read(&format!("/{}/status/{}", self.id, status_name), ctx.stats).await?;
        if status_name == "reboot" {
            tracing::warn!(device = %self.id, reason = %val.trim(), "device rebooted");
            self.initialized = false;
            self.init_channels(ctx).await?;
            return Ok(false);
        }
        tracing::warn!(device = %self.id, status_name, value = %val.trim(), "unknown status field");
        Ok(false)
    }

    async fn handle_channel_alarm(&mut self, ch_name: &str, adc_thresh: Option<char>, ctx: &mut DeviceContext<'_>) -> OwResult<()> {
        let id = self.id.clone();
        if !self.channels.contains_key(ch_name) {
            tracing::debug!(device = %id, ch_name, "ignoring unknown channel alarm");
            return Ok(());
        }

        let path = format!("/{}/{}", id, ch_name);
        let raw = ctx.bus.read(&path, ctx.stats).await?;

        let Some(ch) = self.channels.get_mut(ch_name) else { return Ok(()) };
        match &mut ch.kind {
            MoatChannel::Port { mode, value, .. } => {
                let v: u32 = raw.trim().parse().unwrap_or(0);
                let prev = *value;
                *value = Some(v);
                let has_changed = prev != Some(v);
                let active_high = mode_is_active_high(*mode);
                let bit = (v & 1) != 0;

                let event_type = if mode_is_output(*mode) || (mode & 0b0_0010 != 0 && mode_is_input_toggle(*mode)) {
                    if has_changed {
                        Some(if bit == active_high { PioValue::On } else { PioValue::Off })
                    } else {
                        None
                    }
                } else {
                    Some(PioValue::Trigged)
                };

                if let Some(v) = event_type {
                    emit_pio(ctx, &id, ch_name, v, false);
                }
            }
            MoatChannel::Count { .. } => {}
            MoatChannel::Adc { states, current_state, value, low_threshold, high_threshold, .. } => {
                let v: i64 = raw.trim().parse().unwrap_or(0);
                *value = v;

                if states.is_empty() {
                    *low_threshold = ADC_MAX;
                    *high_threshold = ADC_MIN;
                    ctx.bus
                        .write(&format!("/{}/{}", id, ch_name), &format!("{low_threshold},{high_threshold}"), ctx.stats)
                        .await?;
                    return Ok(());
                }

                let Some(entry) = Self::get_state_entry(states, v).cloned() else {
                    tracing::warn!(device = %id, ch_name, value = v, "alarm value matched no configured state; disabling thresholds");
                    *low_threshold = ADC_MAX;
                    *high_threshold = ADC_MIN;
                    ctx.bus
                        .write(&format!("/{}/{}", id, ch_name), &format!("{low_threshold},{high_threshold}"), ctx.stats)
                        .await?;
                    return Ok(());
                };

                let target = if current_state.as_deref() == Some(entry.name.as_str()) {
                    match adc_thresh {
                        Some(c) => Self::guess_state_entry(states, current_state.as_deref(), c).cloned(),
                        None => None,
                    }
                } else {
                    Some(entry)
                };

                if let Some(target) = target {
                    *current_state = Some(target.name.clone());
                    *low_threshold = target.low;
                    *high_threshold = target.high;
                    emit_pio(ctx, &id, ch_name, PioValue::State(target.name.clone()), false);
                    ctx.bus
                        .write(&format!("/{}/{}", id, ch_name), &format!("{low_threshold},{high_threshold}"), ctx.stats)
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_device_is_not_initialized() {
        let dev = MoatDevice::new("F0.ABCDEF000000");
        assert!(!dev.initialized);
        assert!(dev.channels.is_empty());
    }

    #[test]
    fn state_lookup_finds_matching_range() {
        let states = vec![
            AdcState { name: "closed".into(), low: 0, high: 3000, guess: true },
            AdcState { name: "open".into(), low: 3001, high: 65535, guess: true },
        ];
        let found = MoatDevice::get_state_entry(&states, 100).unwrap();
        assert_eq!(found.name, "closed");
    }

    #[test]
    fn guess_state_entry_steps_toward_crossed_threshold() {
        let states = vec![
            AdcState { name: "closed".into(), low: 0, high: 3000, guess: true },
            AdcState { name: "open".into(), low: 3001, high: 65535, guess: true },
        ];
        let guessed = MoatDevice::guess_state_entry(&states, Some("closed"), '+').unwrap();
        assert_eq!(guessed.name, "open");
    }
}
