// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios against a fake owserver, covering the bus/device/
//! dispatcher stack the per-module unit tests don't exercise together.
//!
//! `S2` (momentary double-transition), `S4` (ADC state transition) are
//! covered at the unit level in `owmaster-core`'s `device::pio`/`device::moat`
//! tests; `S6` (scheduler priority) in `device::sched`'s
//! `scenario_s6_scheduler_priority`; `S3` (alarm register reconciliation) in
//! `device::pio`'s alarm-config tests. This file covers `S1` and `S5`, which
//! both need a real bus connection to exercise meaningfully.

use owmaster_core::bus::Bus;
use owmaster_core::device::temperature::TemperatureDevice;
use owmaster_core::device::{Device, DeviceContext};
use owmaster_core::event::{EventDispatcher, EventKind};
use owmaster_core::stats::Statistics;

use owmaster_specs::{FakeOwserver, RecordingHandler, Script};

/// S1 — Temperature read: one device, simultaneous conversion broadcast,
/// then a read back of `/<id>/temperature` yields one `Temperature` event.
#[tokio::test]
async fn s1_temperature_read_via_simultaneous_batch() {
    let script = Script::new();
    script.set_read("/10.0123456789AB/temperature", "22.5");
    let server = FakeOwserver::spawn(script.clone()).await.expect("fake owserver spawns");

    let mut bus = Bus::new("127.0.0.1", server.port);
    let mut stats = Statistics::new();
    let mut dispatcher = EventDispatcher::new();
    let recorder = RecordingHandler::default();
    dispatcher.add_handler(Box::new(recorder.clone()));

    bus.write("/simultaneous/temperature", "1", &mut stats).await.expect("broadcast write succeeds");
    assert_eq!(script.recorded_writes(), vec![("/simultaneous/temperature".to_owned(), "1".to_owned())]);

    let mut device = TemperatureDevice::new("10.0123456789AB", "10");
    let mut ctx = DeviceContext { bus: &mut bus, stats: &mut stats, dispatcher: &mut dispatcher, timestamp: 1_000.0 };
    device.simultaneous_read(&mut ctx).await.expect("simultaneous read succeeds");

    let events = recorder.events.lock().unwrap().clone();
    assert_eq!(events.len(), 1);
    match &events[0].kind {
        EventKind::Temperature { value, .. } => assert_eq!(*value, 22.5),
        other => panic!("expected a Temperature event, got {other:?}"),
    }
    assert_eq!(events[0].device_id.as_deref(), Some("10.0123456789AB"));
}

/// S5 — Connection loss: a scan failure drops the connection, and the next
/// call transparently reconnects and succeeds once the server recovers.
#[tokio::test]
async fn s5_connection_loss_then_automatic_recovery() {
    let script = Script::new();
    script.push_dir(vec!["/10.0123456789AB".to_owned()]);
    let server = FakeOwserver::spawn(script.clone()).await.expect("fake owserver spawns");

    let mut bus = Bus::new("127.0.0.1", server.port);
    let mut stats = Statistics::new();

    let first = bus.dir("/uncached/", &mut stats).await.expect("first scan succeeds");
    assert_eq!(first, vec!["/10.0123456789AB".to_owned()]);

    // No reply queued: the fake server closes the connection on this DIRALL.
    let second = bus.dir("/uncached/", &mut stats).await;
    assert!(second.is_err(), "expected the dropped connection to surface as an error");

    script.push_dir(vec!["/10.0123456789AB".to_owned()]);
    let third = bus.dir("/uncached/", &mut stats).await.expect("bus reconnects transparently");
    assert_eq!(third, vec!["/10.0123456789AB".to_owned()]);

    assert_eq!(stats.get("ops.count_dir"), 3.0);
}
