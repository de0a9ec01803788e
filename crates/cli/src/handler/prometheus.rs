// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Prometheus metrics sink (C8). Grounded on
//! `pyowmaster/prometheus.py::OwMasterPrometheusCollector`, which implements
//! a `client_python` custom collector yielding one gauge per counter key.
//!
//! Rust's `prometheus` crate (sourced from the `knhk` example pack, which
//! carries it for its own metrics surface — the teacher has no metrics
//! dependency) discourages dynamically-named metrics in favor of a fixed
//! metric name with labels, which is also the upstream Prometheus naming
//! best practice. This sink follows that idiom: `owmaster_stat{category,
//! name}` in place of the original's `owmaster_<k>` per-key gauges,
//! `owfs_tries{name}` / `owfs_errors{name}` for the bus-statistics
//! pseudo-device's counters, and `ow_temperature_sensor{id, alias}` for the
//! last reading of every temperature sensor seen.

use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

use owmaster_core::event::{Event, EventHandler, EventKind};

pub struct PrometheusSink {
    registry: Registry,
    stat: GaugeVec,
    owfs_tries: GaugeVec,
    owfs_errors: GaugeVec,
    temperature: GaugeVec,
    aliases: Mutex<std::collections::HashMap<String, String>>,
}

impl PrometheusSink {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let stat = GaugeVec::new(
            Opts::new("owmaster_stat", "Master orchestrator counters, by category and name"),
            &["category", "name"],
        )?;
        let owfs_tries = GaugeVec::new(
            Opts::new("owfs_tries", "owserver bus retry counters, by counter name"),
            &["name"],
        )?;
        let owfs_errors = GaugeVec::new(
            Opts::new("owfs_errors", "owserver bus error counters, by counter name"),
            &["name"],
        )?;
        let temperature = GaugeVec::new(
            Opts::new("ow_temperature_sensor", "Last temperature reading, degrees Celsius"),
            &["id", "alias"],
        )?;

        registry.register(Box::new(stat.clone()))?;
        registry.register(Box::new(owfs_tries.clone()))?;
        registry.register(Box::new(owfs_errors.clone()))?;
        registry.register(Box::new(temperature.clone()))?;

        Ok(Arc::new(Self {
            registry,
            stat,
            owfs_tries,
            owfs_errors,
            temperature,
            aliases: Mutex::new(std::collections::HashMap::new()),
        }))
    }

    /// Replace the id-to-alias map used to label `ow_temperature_sensor`.
    /// Called by the orchestrator after every config (re)load.
    pub fn set_aliases(&self, aliases: std::collections::HashMap<String, String>) {
        #[allow(clippy::unwrap_used)]
        let mut guard = self.aliases.lock().unwrap_or_else(|e| e.into_inner());
        *guard = aliases;
    }

    fn alias_for(&self, id: &str) -> String {
        #[allow(clippy::unwrap_used)]
        let guard = self.aliases.lock().unwrap_or_else(|e| e.into_inner());
        guard.get(id).cloned().unwrap_or_default()
    }

    /// Build the axum router serving `GET /metrics` in Prometheus text
    /// exposition format.
    pub fn router(self: Arc<Self>) -> Router {
        Router::new().route("/metrics", get(serve_metrics)).with_state(self)
    }

    fn record(&self, event: &Event) {
        match &event.kind {
            EventKind::Statistics { category, name, value } => match category.as_str() {
                "error" => self.owfs_errors.with_label_values(&[name]).set(*value),
                "tries" => self.owfs_tries.with_label_values(&[name]).set(*value),
                other => self.stat.with_label_values(&[other, name]).set(*value),
            },
            EventKind::Temperature { value, .. } => {
                let Some(id) = &event.device_id else { return };
                let alias = self.alias_for(id);
                self.temperature.with_label_values(&[id, &alias]).set(*value);
            }
            _ => {}
        }
    }
}

/// Thin `EventHandler` adapter over a shared [`PrometheusSink`]. Separate
/// from the sink itself because the sink is also held as `Arc<PrometheusSink>`
/// by the axum router (shared, no `&mut` access), while `EventHandler`
/// requires `&mut self`; `prometheus`'s gauges are internally atomic, so
/// recording through a shared reference is sound.
pub struct PrometheusHandler(pub Arc<PrometheusSink>);

impl EventHandler for PrometheusHandler {
    fn handle_event(&mut self, event: &Event) {
        self.0.record(event);
    }
}

async fn serve_metrics(State(sink): State<Arc<PrometheusSink>>) -> impl IntoResponse {
    let metric_families = sink.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metric_families, &mut buf) {
        warn!(error = %e, "failed to encode prometheus metrics");
        return (StatusCode::INTERNAL_SERVER_ERROR, String::new());
    }
    (StatusCode::OK, String::from_utf8_lossy(&buf).into_owned())
}
