// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Master orchestrator (C9): owns the priority scheduler, the bus, the
//! device inventory, and the event dispatcher, and drives the scan cadence
//! that turns owserver directory listings into device callbacks.
//!
//! Grounded on `pyowmaster/__init__.py::OwMaster`/`MasterStatistics`.
//! REDESIGNED per spec §4.9/§5: the original's single-threaded `sched`-driven
//! loop is cooperative with blocking I/O baked in; here the scheduler's
//! blocking `run()` loop lives on a dedicated OS thread that enters (but does
//! not drive) a current-thread Tokio runtime, so scheduled task closures can
//! call `Handle::block_on` to run the async bus/device calls to completion
//! synchronously, one at a time, preserving the original's single-flight bus
//! ownership without making the scheduler itself async.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{error, info, warn};

use owmaster_core::bus::Bus;
use owmaster_core::config::{path, Config, ConfigValue};
use owmaster_core::device::busstats::BusStatsDevice;
use owmaster_core::device::factory::DeviceFactory;
use owmaster_core::device::inventory::DeviceInventory;
use owmaster_core::device::{Device, DeviceContext};
use owmaster_core::event::{Event, EventDispatcher, EventKind};
use owmaster_core::id::owid_from_path;
use owmaster_core::sched::{QueueId, Scheduler, SchedulerHandle};
use owmaster_core::stats::Statistics;

use crate::handler::action::ActionHandler;
use crate::handler::prometheus::{PrometheusHandler, PrometheusSink};
use crate::handler::threaded::{Delegate, ThreadedHandler};

/// Every `on_alarm`/`on_seen` call after a bus connection has never yet
/// succeeded backs off up to this many seconds between retries.
const MAX_STARTUP_BACKOFF: f64 = 60.0;
/// Once a scan has succeeded at least once, subsequent connection failures
/// back off up to this many seconds instead (§4.9 "Connection failures").
const MAX_SCAN_BACKOFF: f64 = 20.0;
/// Minimum delay between broadcasting a simultaneous-conversion command and
/// reading the participating devices back (invariant 6).
const SIMULTANEOUS_SETTLE_S: f64 = 1.0;

fn additive_backoff(errs: u32, cap: f64) -> f64 {
    (2.0 * f64::from(errs) + 1.0).min(cap)
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn lock_mutex<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

/// The bus connection, running statistics, and dispatcher — everything a
/// device callback needs a [`DeviceContext`] built from. Kept separate from
/// the device inventory, which has its own lock shared with handlers that
/// never touch the bus (e.g. [`ActionHandler`]).
struct MasterState {
    bus: Bus,
    stats: Statistics,
    dispatcher: EventDispatcher,
}

enum Callback {
    Seen,
    Alarm,
    SimultaneousRead,
}

/// Everything a scheduled scan task needs, cheaply cloneable so each
/// reschedule can capture a fresh copy.
#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<MasterState>>,
    inventory: Arc<Mutex<DeviceInventory>>,
    bus_stats: Arc<Mutex<BusStatsDevice>>,
    scheduler: SchedulerHandle,
    queue_high: QueueId,
    queue_low: QueueId,
    scan_interval: f64,
    alarm_interval: f64,
    stats_report_interval: f64,
    bootstrapped: Arc<AtomicBool>,
    full_errs: Arc<Mutex<u32>>,
    alarm_errs: Arc<Mutex<u32>>,
    simultaneous_pending: Arc<AtomicBool>,
}

fn bump_stat(state: &Arc<Mutex<MasterState>>, key: &str, value: f64) {
    lock_mutex(state).stats.increment(key, value);
}

fn next_backoff(errs: &Arc<Mutex<u32>>, bootstrapped: bool) -> f64 {
    let mut n = lock_mutex(errs);
    *n += 1;
    additive_backoff(*n, if bootstrapped { MAX_SCAN_BACKOFF } else { MAX_STARTUP_BACKOFF })
}

fn reset_backoff(errs: &Arc<Mutex<u32>>, what: &str) {
    let mut n = lock_mutex(errs);
    if *n > 0 {
        info!("{what} back online");
    }
    *n = 0;
}

fn dispatch_device_callback(
    state: &Arc<Mutex<MasterState>>,
    inventory: &Arc<Mutex<DeviceInventory>>,
    dev_id: &str,
    timestamp: f64,
    callback: Callback,
) {
    let mut state_guard = lock_mutex(state);
    let mut inv_guard = lock_mutex(inventory);
    let Some(device) = inv_guard.device_mut(dev_id) else { return };
    let MasterState { bus, stats, dispatcher } = &mut *state_guard;
    let mut ctx = DeviceContext { bus, stats, dispatcher, timestamp };

    let rt = tokio::runtime::Handle::current();
    let result = match callback {
        Callback::Seen => rt.block_on(device.on_seen(&mut ctx)),
        Callback::Alarm => rt.block_on(device.on_alarm(&mut ctx)),
        Callback::SimultaneousRead => rt.block_on(device.simultaneous_read(&mut ctx)),
    };

    if let Err(e) = result {
        if e.is_scan_recoverable() {
            warn!(device = dev_id, error = %e, "device callback failed, will retry next scan");
        } else {
            error!(device = dev_id, error = %e, "device callback failed, skipping device");
        }
    }
}

fn dispatch_bus_stats(shared: &Shared, timestamp: f64) {
    let mut dev = lock_mutex(&shared.bus_stats);
    let mut state_guard = lock_mutex(&shared.state);
    let MasterState { bus, stats, dispatcher } = &mut *state_guard;
    let mut ctx = DeviceContext { bus, stats, dispatcher, timestamp };

    let rt = tokio::runtime::Handle::current();
    if let Err(e) = rt.block_on(dev.on_seen(&mut ctx)) {
        warn!(error = %e, "bus statistics read failed");
    }
}

/// De-duplicate device IDs found in a directory listing, bumping
/// `error.scan_duplicate` for repeats.
fn collect_ids(state: &Arc<Mutex<MasterState>>, paths: &[String]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for p in paths {
        let Some(id) = owid_from_path(p) else { continue };
        if ids.contains(&id) {
            bump_stat(state, "error.scan_duplicate", 1.0);
            continue;
        }
        ids.push(id);
    }
    ids
}

fn run_full_scan(shared: Shared) {
    let timestamp = now_unix();
    let rt = tokio::runtime::Handle::current();

    let result = {
        let mut guard = lock_mutex(&shared.state);
        let MasterState { bus, stats, .. } = &mut *guard;
        stats.increment("tries.full_scan", 1.0);
        rt.block_on(bus.dir("/uncached/", stats))
    };

    match result {
        Ok(paths) => {
            reset_backoff(&shared.full_errs, "full scan");
            shared.bootstrapped.store(true, AtomicOrdering::Relaxed);

            let ids = collect_ids(&shared.state, &paths);
            let mut simultaneous_temp: Vec<String> = Vec::new();

            for id in &ids {
                let (found, tag) = {
                    let mut inv = lock_mutex(&shared.inventory);
                    inv.mark_seen(id);
                    match inv.find(id, true) {
                        Some(dev) => (true, dev.simultaneous_tag()),
                        None => (false, None),
                    }
                };
                if !found {
                    continue;
                }

                match tag {
                    Some("temperature") => simultaneous_temp.push(id.clone()),
                    Some(other) => {
                        error!(
                            device = %id,
                            tag = other,
                            "device requested an unsupported simultaneous-conversion batch"
                        );
                    }
                    None => {
                        let dev_id = id.clone();
                        let shared2 = shared.clone();
                        shared.scheduler.enter(
                            shared.queue_low,
                            0.0,
                            Box::new(move || {
                                dispatch_device_callback(&shared2.state, &shared2.inventory, &dev_id, timestamp, Callback::Seen);
                            }),
                        );
                    }
                }
            }

            let lost = lock_mutex(&shared.inventory).mark_missing(&ids);
            if !lost.is_empty() {
                bump_stat(&shared.state, "error.lost_devices", lost.len() as f64);
                for id in &lost {
                    warn!(device = %id, "device lost");
                }
            }

            if !simultaneous_temp.is_empty() {
                if shared.simultaneous_pending.swap(true, AtomicOrdering::AcqRel) {
                    error!("simultaneous temperature batch already in flight, skipping this scan");
                } else {
                    let write_result = {
                        let mut guard = lock_mutex(&shared.state);
                        let MasterState { bus, stats, .. } = &mut *guard;
                        rt.block_on(bus.write("/simultaneous/temperature", "1", stats))
                    };
                    if let Err(e) = write_result {
                        warn!(error = %e, "failed to broadcast simultaneous temperature conversion");
                        shared.simultaneous_pending.store(false, AtomicOrdering::Release);
                    } else {
                        let shared3 = shared.clone();
                        shared.scheduler.enter(
                            shared.queue_low,
                            SIMULTANEOUS_SETTLE_S,
                            Box::new(move || {
                                for id in &simultaneous_temp {
                                    dispatch_device_callback(&shared3.state, &shared3.inventory, id, timestamp, Callback::SimultaneousRead);
                                }
                                shared3.simultaneous_pending.store(false, AtomicOrdering::Release);
                            }),
                        );
                    }
                }
            }

            let shared_bs = shared.clone();
            shared.scheduler.enter(
                shared.queue_low,
                0.0,
                Box::new(move || dispatch_bus_stats(&shared_bs, timestamp)),
            );

            let count = lock_mutex(&shared.inventory).size();
            bump_stat(&shared.state, "bus.device_count", count as f64);

            let shared_next = shared.clone();
            shared.scheduler.enter(shared.queue_low, shared.scan_interval, Box::new(move || run_full_scan(shared_next.clone())));
        }
        Err(e) => {
            let delay = next_backoff(&shared.full_errs, shared.bootstrapped.load(AtomicOrdering::Relaxed));
            error!(error = %e, delay, "full scan connection failure, retrying");
            let shared_next = shared.clone();
            shared.scheduler.enter(shared.queue_low, delay, Box::new(move || run_full_scan(shared_next.clone())));
        }
    }
}

fn run_alarm_scan(shared: Shared) {
    let timestamp = now_unix();
    let rt = tokio::runtime::Handle::current();

    let result = {
        let mut guard = lock_mutex(&shared.state);
        let MasterState { bus, stats, .. } = &mut *guard;
        stats.increment("tries.alarm_scan", 1.0);
        rt.block_on(bus.dir("/alarm/", stats))
    };

    match result {
        Ok(paths) => {
            reset_backoff(&shared.alarm_errs, "alarm scan");

            let ids = collect_ids(&shared.state, &paths);
            for id in ids {
                let found = lock_mutex(&shared.inventory).find(&id, true).is_some();
                if !found {
                    continue;
                }
                let shared2 = shared.clone();
                shared.scheduler.enter(
                    shared.queue_high,
                    0.0,
                    Box::new(move || {
                        dispatch_device_callback(&shared2.state, &shared2.inventory, &id, timestamp, Callback::Alarm);
                    }),
                );
            }

            let shared_next = shared.clone();
            shared.scheduler.enter(shared.queue_high, shared.alarm_interval, Box::new(move || run_alarm_scan(shared_next.clone())));
        }
        Err(e) => {
            let delay = next_backoff(&shared.alarm_errs, shared.bootstrapped.load(AtomicOrdering::Relaxed));
            error!(error = %e, delay, "alarm scan connection failure, retrying");
            let shared_next = shared.clone();
            shared.scheduler.enter(shared.queue_high, delay, Box::new(move || run_alarm_scan(shared_next.clone())));
        }
    }
}

fn run_stats_report(shared: Shared) {
    let timestamp = now_unix();
    let snapshot = lock_mutex(&shared.state).stats.snapshot();

    {
        let mut guard = lock_mutex(&shared.state);
        for (category, name, value) in snapshot {
            let event = Event::new(timestamp, None, EventKind::Statistics { category, name, value });
            guard.dispatcher.handle_event(event);
        }
    }

    let shared_next = shared.clone();
    shared.scheduler.enter(
        shared.queue_low,
        shared.stats_report_interval,
        Box::new(move || run_stats_report(shared_next.clone())),
    );
}

/// Gathers `devices.<id>.alias` and `devices.aliases.<id>` into an
/// id-to-alias map for the Prometheus sink's labeling. Kept independent of
/// [`DeviceInventory`]'s own (alias-to-id) map, which is only populated for
/// devices it already knows about.
fn collect_aliases(config: &Config) -> HashMap<String, String> {
    let mut aliases = HashMap::new();
    let Some(ConfigValue::Map(devices)) = config.section("devices") else { return aliases };

    for (dev_id, dev_cfg) in devices {
        if let Some(alias) = dev_cfg.as_map().and_then(|m| m.get("alias")).and_then(ConfigValue::as_str) {
            aliases.insert(dev_id.clone(), alias.to_owned());
        }
    }
    if let Some(ConfigValue::Map(alias_map)) = devices.get("aliases") {
        for (dev_id, alias_val) in alias_map {
            if let Some(alias) = alias_val.as_str() {
                aliases.insert(dev_id.clone(), alias.to_owned());
            }
        }
    }
    aliases
}

/// Forwards to a shared [`ActionHandler`] so the orchestrator can keep a
/// handle to it for config reloads, while the dispatcher's `ThreadedHandler`
/// only needs a `Delegate`.
struct SharedActionHandler(Arc<Mutex<ActionHandler>>);

impl Delegate for SharedActionHandler {
    fn handle_event(&mut self, event: &Event) {
        lock_mutex(&self.0).handle_event(event);
    }
}

/// Owns the running daemon: the scheduler thread, the bus/inventory state,
/// and the wired-up handlers. Dropping this without calling [`Master::shutdown`]
/// leaves the scheduler thread running.
pub struct Master {
    state: Arc<Mutex<MasterState>>,
    inventory: Arc<Mutex<DeviceInventory>>,
    action_handler: Arc<Mutex<ActionHandler>>,
    prometheus: Option<Arc<PrometheusSink>>,
    stop: Arc<AtomicBool>,
    scheduler_thread: Option<JoinHandle<()>>,
}

impl Master {
    /// Build the inventory/handlers from `config`, wire up the scheduler's
    /// two queues, and spawn its dedicated thread. CLI overrides
    /// (`--owserver-host`/`--owserver-port`) take precedence over the
    /// config document's `owmaster.owserver_host`/`owserver_port`.
    pub fn spawn(config: Config, owserver_host: Option<String>, owserver_port: Option<u16>, metrics_port: Option<u16>) -> Self {
        let host = owserver_host.unwrap_or_else(|| config.get_str(&path(&["owmaster", "owserver_host"]), "localhost"));
        let port = owserver_port.unwrap_or_else(|| config.get_u64(&path(&["owmaster", "owserver_port"]), 4304) as u16);
        let scan_interval = config.get_f64(&path(&["owmaster", "scan_interval"]), 30.0);
        let alarm_interval = config.get_f64(&path(&["owmaster", "alarm_scan_interval"]), 1.0);
        let stats_report_interval = config.get_f64(&path(&["owmaster", "stats_report_interval"]), 60.0);

        let inventory = Arc::new(Mutex::new(DeviceInventory::new(DeviceFactory::new(), &config)));
        let bus_stats = Arc::new(Mutex::new(BusStatsDevice::new()));

        let mut dispatcher = EventDispatcher::new();
        dispatcher.pause();

        let mut action_handler = ActionHandler::new(Arc::clone(&inventory));
        action_handler.load_config(&config);
        let action_handler = Arc::new(Mutex::new(action_handler));
        dispatcher.add_handler(Box::new(ThreadedHandler::new(SharedActionHandler(Arc::clone(&action_handler)))));

        let prometheus: Option<Arc<PrometheusSink>> = match metrics_port {
            Some(_) => match PrometheusSink::new() {
                Ok(sink) => {
                    sink.set_aliases(collect_aliases(&config));
                    dispatcher.add_handler(Box::new(PrometheusHandler(Arc::clone(&sink))));
                    Some(sink)
                }
                Err(e) => {
                    error!(error = %e, "failed to initialize prometheus sink, metrics disabled");
                    None
                }
            },
            None => None,
        };

        dispatcher.resume();

        let state = Arc::new(Mutex::new(MasterState {
            bus: Bus::new(host, port),
            stats: Statistics::new(),
            dispatcher,
        }));

        let mut scheduler = Scheduler::with_system_clock();
        // The low queue carries the bulk of per-scan device dispatches (one
        // per discovered device) in addition to its own periodic work, so it
        // gets a much larger dispatch allowance than the alarm queue, which
        // only ever handles the (typically small) set of currently-alarming
        // devices per tick.
        let queue_high = scheduler.create_queue(1, 16);
        let queue_low = scheduler.create_queue(1, 64);
        let stop = scheduler.stop_flag();
        let sched_handle = scheduler.handle();

        let shared = Shared {
            state: Arc::clone(&state),
            inventory: Arc::clone(&inventory),
            bus_stats,
            scheduler: sched_handle,
            queue_high,
            queue_low,
            scan_interval,
            alarm_interval,
            stats_report_interval,
            bootstrapped: Arc::new(AtomicBool::new(false)),
            full_errs: Arc::new(Mutex::new(0)),
            alarm_errs: Arc::new(Mutex::new(0)),
            simultaneous_pending: Arc::new(AtomicBool::new(false)),
        };

        let s1 = shared.clone();
        scheduler.enter(queue_low, 0.0, Box::new(move || run_full_scan(s1.clone())));
        let s2 = shared.clone();
        scheduler.enter(queue_high, 0.0, Box::new(move || run_alarm_scan(s2.clone())));
        let s3 = shared.clone();
        scheduler.enter(queue_low, stats_report_interval, Box::new(move || run_stats_report(s3.clone())));

        let scheduler_thread = match std::thread::Builder::new().name("owmaster-scheduler".into()).spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    error!(error = %e, "failed to build scheduler runtime, orchestrator will not scan");
                    return;
                }
            };
            let _guard = rt.enter();
            scheduler.run();
        }) {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!(error = %e, "failed to spawn scheduler thread, orchestrator will not scan");
                None
            }
        };

        Self {
            state,
            inventory,
            action_handler,
            prometheus,
            stop,
            scheduler_thread,
        }
    }

    /// A clonable flag set at the start of graceful shutdown; observed by
    /// the scheduler's run loop at its next sleep boundary.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn prometheus_sink(&self) -> Option<Arc<PrometheusSink>> {
        self.prometheus.clone()
    }

    /// Re-applies `config` to the device inventory, the action handler, and
    /// the Prometheus alias map. Safe to call from outside the scheduler
    /// thread: none of this touches the bus.
    pub fn refresh_config(&self, config: &Config) {
        lock_mutex(&self.inventory).refresh_config(config);
        lock_mutex(&self.action_handler).load_config(config);
        if let Some(sink) = &self.prometheus {
            sink.set_aliases(collect_aliases(config));
        }
        info!("configuration reloaded");
    }

    /// Logs a snapshot of inventory size and running statistics at `info`
    /// level. Replaces the original's interactive command prompt (see
    /// spec §4.11) with a non-interactive dump driven by `SIGUSR1`.
    pub fn dump_diagnostics(&self) {
        let device_count = lock_mutex(&self.inventory).size();
        info!(device_count, "diagnostics: device inventory");
        for id in lock_mutex(&self.inventory).ids() {
            info!(device = %id, "diagnostics: known device");
        }
        for (category, name, value) in lock_mutex(&self.state).stats.snapshot() {
            info!(category, name, value, "diagnostics: statistic");
        }
    }

    /// Stops the scheduler, shuts down every event handler (joining their
    /// worker threads), and waits for the scheduler thread to exit. May
    /// block up to the scheduler's current sleep interval, since the stop
    /// flag is only observed at the top of each run-loop iteration.
    pub fn shutdown(self) {
        self.stop.store(true, AtomicOrdering::Relaxed);
        if let Some(handle) = self.scheduler_thread {
            let _ = handle.join();
        }
        lock_mutex(&self.state).dispatcher.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_backoff_is_capped_at_sixty_seconds() {
        let errs = Arc::new(Mutex::new(0));
        let mut last = 0.0;
        for _ in 0..40 {
            last = next_backoff(&errs, false);
        }
        assert_eq!(last, MAX_STARTUP_BACKOFF);
    }

    #[test]
    fn running_backoff_is_capped_at_twenty_seconds() {
        let errs = Arc::new(Mutex::new(0));
        let mut last = 0.0;
        for _ in 0..40 {
            last = next_backoff(&errs, true);
        }
        assert_eq!(last, MAX_SCAN_BACKOFF);
    }

    #[test]
    fn backoff_grows_additively_before_the_cap() {
        let errs = Arc::new(Mutex::new(0));
        assert_eq!(next_backoff(&errs, true), 3.0);
        assert_eq!(next_backoff(&errs, true), 5.0);
        assert_eq!(next_backoff(&errs, true), 7.0);
    }

    #[test]
    fn collect_aliases_reads_both_forms() {
        let yaml = "
devices:
  28.AAAAAAAAAAAA:
    alias: porch
  aliases:
    29.BBBBBBBBBBBB: garage
";
        let cfg = Config::from_yaml_str(yaml).unwrap();
        let aliases = collect_aliases(&cfg);
        assert_eq!(aliases.get("28.AAAAAAAAAAAA").map(String::as_str), Some("porch"));
        assert_eq!(aliases.get("29.BBBBBBBBBBBB").map(String::as_str), Some("garage"));
    }
}
