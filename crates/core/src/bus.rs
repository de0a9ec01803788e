// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bus client wrapper (§4.2): adds timing, slow-operation warnings, and
//! statistics recording on top of the raw [`owserver::OwserverClient`].
//!
//! Grounded on the timing/warn-threshold behavior implied by
//! `pyowmaster/__init__.py`'s statistics bookkeeping around each bus call.

use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::OwResult;
use crate::owserver::OwserverClient;
use crate::stats::Statistics;

const DEFAULT_READ_WARN: Duration = Duration::from_secs(1);
const DEFAULT_WRITE_WARN: Duration = Duration::from_secs(1);
const DEFAULT_DIR_WARN: Duration = Duration::from_secs(2);

/// Wraps a single [`OwserverClient`] connection, recording per-operation
/// timing into [`Statistics`] and logging a warning when an operation
/// exceeds its configured threshold.
pub struct Bus {
    client: OwserverClient,
    read_warn: Duration,
    write_warn: Duration,
    dir_warn: Duration,
}

impl Bus {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            client: OwserverClient::new(host, port),
            read_warn: DEFAULT_READ_WARN,
            write_warn: DEFAULT_WRITE_WARN,
            dir_warn: DEFAULT_DIR_WARN,
        }
    }

    pub fn with_thresholds(mut self, read_warn: Duration, write_warn: Duration, dir_warn: Duration) -> Self {
        self.read_warn = read_warn;
        self.write_warn = write_warn;
        self.dir_warn = dir_warn;
        self
    }

    pub async fn read(&mut self, path: &str, stats: &mut Statistics) -> OwResult<String> {
        let start = Instant::now();
        let result = self.client.read(path).await;
        self.record("read", path, start.elapsed(), self.read_warn, stats);
        result
    }

    pub async fn write(&mut self, path: &str, data: &str, stats: &mut Statistics) -> OwResult<()> {
        let start = Instant::now();
        let result = self.client.write(path, data).await;
        self.record("write", path, start.elapsed(), self.write_warn, stats);
        result
    }

    pub async fn dir(&mut self, path: &str, stats: &mut Statistics) -> OwResult<Vec<String>> {
        let start = Instant::now();
        let result = self.client.dir(path).await;
        self.record("dir", path, start.elapsed(), self.dir_warn, stats);
        result
    }

    fn record(&self, op: &str, path: &str, elapsed: Duration, warn_at: Duration, stats: &mut Statistics) {
        let ms = elapsed.as_secs_f64() * 1000.0;
        stats.record_op(op, ms);
        if elapsed > warn_at {
            warn!(op, path, elapsed_ms = ms, "slow bus operation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_flags_slow_operation_in_stats() {
        let bus = Bus::new("localhost", 4304);
        let mut stats = Statistics::new();
        bus.record("read", "/foo", Duration::from_millis(5), Duration::from_secs(1), &mut stats);
        assert_eq!(stats.get("ops.count_read"), 1.0);
        assert_eq!(stats.get("ops.ms_read"), 5.0);
    }
}
