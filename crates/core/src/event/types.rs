// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Grounded on `pyowmaster/event/events.py` (`OwEventBase`, `OwCounterEvent`,
//! `OwTemperatureEvent`, `OwStatisticsEvent`, `OwPIOEvent`).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureUnit {
    C,
    F,
    K,
    R,
}

impl TemperatureUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::C => "C",
            Self::F => "F",
            Self::K => "K",
            Self::R => "R",
        }
    }
}

/// The value carried by a PIO event. `TRIGGED` is used for momentary inputs;
/// `On`/`Off` for toggle inputs and outputs; `State` for composite-slave ADC
/// channels reporting a named range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PioValue {
    On,
    Off,
    Trigged,
    State(String),
}

impl PioValue {
    pub fn as_str(&self) -> &str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
            Self::Trigged => "TRIGGED",
            Self::State(s) => s.as_str(),
        }
    }
}

/// The event payload variants from spec §3.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    Temperature {
        value: f64,
        unit: TemperatureUnit,
    },
    Counter {
        channel: String,
        value: u64,
    },
    Adc {
        channel: String,
        value: u32,
    },
    Pio {
        channel: String,
        value: PioValue,
    },
    Statistics {
        category: String,
        name: String,
        value: f64,
    },
    Config,
}

/// A single emitted event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub timestamp: f64,
    /// `None` for bus-wide pseudo-device events (e.g. master statistics).
    pub device_id: Option<String>,
    pub is_reset: bool,
    pub kind: EventKind,
}

impl Event {
    pub fn new(timestamp: f64, device_id: Option<String>, kind: EventKind) -> Self {
        Self {
            timestamp,
            device_id,
            is_reset: false,
            kind,
        }
    }

    pub fn with_reset(mut self, is_reset: bool) -> Self {
        self.is_reset = is_reset;
        self
    }

    /// The event-type name used for action-handler config lookups
    /// (`devices.<id>.<ch>.<event-type>`).
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            EventKind::Temperature { .. } => "temperature",
            EventKind::Counter { .. } => "counter",
            EventKind::Adc { .. } => "adc",
            EventKind::Pio { .. } => "pio",
            EventKind::Statistics { .. } => "statistics",
            EventKind::Config => "config",
        }
    }

    pub fn channel(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Counter { channel, .. }
            | EventKind::Adc { channel, .. }
            | EventKind::Pio { channel, .. } => Some(channel.as_str()),
            _ => None,
        }
    }
}
