// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Statistics counters (`MasterStatistics` in the original source).
//!
//! Grounded on `pyowmaster/__init__.py::MasterStatistics`. Keys are dotted
//! `<category>.<name>`; values are plain counters incremented in place
//! (§9 "Statistics counter naming" open question — count/ms are both defined
//! as simple running sums here, per the decided semantics).

use std::collections::BTreeMap;

/// A flat table of named counters, reported periodically as `Statistics`
/// events by the master orchestrator.
#[derive(Debug, Default)]
pub struct Statistics {
    counters: BTreeMap<String, f64>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initialize a counter to zero so it is reported even if never
    /// incremented.
    pub fn init(&mut self, key: &str) {
        self.counters.entry(key.to_owned()).or_insert(0.0);
    }

    /// Increment `key` (format `<category>.<name>`) by `value`.
    pub fn increment(&mut self, key: &str, value: f64) {
        *self.counters.entry(key.to_owned()).or_insert(0.0) += value;
    }

    pub fn get(&self, key: &str) -> f64 {
        self.counters.get(key).copied().unwrap_or(0.0)
    }

    /// Record a bus operation: bumps `ops.count_<op>` by 1 and
    /// `ops.ms_<op>` by `duration_ms`.
    pub fn record_op(&mut self, op: &str, duration_ms: f64) {
        self.increment(&format!("ops.count_{op}"), 1.0);
        self.increment(&format!("ops.ms_{op}"), duration_ms);
    }

    /// Snapshot of all tracked `(category, name, value)` triples, for the
    /// periodic statistics report.
    pub fn snapshot(&self) -> Vec<(String, String, f64)> {
        self.counters
            .iter()
            .filter_map(|(key, value)| {
                let (category, name) = key.split_once('.')?;
                Some((category.to_owned(), name.to_owned(), *value))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_op_increments_count_and_ms() {
        let mut stats = Statistics::new();
        stats.record_op("read", 12.5);
        stats.record_op("read", 7.5);
        assert_eq!(stats.get("ops.count_read"), 2.0);
        assert_eq!(stats.get("ops.ms_read"), 20.0);
    }

    #[test]
    fn init_reports_zero_without_increment() {
        let mut stats = Statistics::new();
        stats.init("error.lost_devices");
        let snap = stats.snapshot();
        assert!(snap.iter().any(|(c, n, v)| c == "error" && n == "lost_devices" && *v == 0.0));
    }
}
