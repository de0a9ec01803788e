// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drives the real `Master` orchestrator against a fake owserver end to end:
//! config loading, the scheduler thread, a full scan, and the Prometheus
//! sink all wired together the way `owmasterd`'s binary wires them.

use std::time::Duration;

use owmaster_core::Config;
use owmasterd::master::Master;

use owmaster_specs::{tcp_http_get, FakeOwserver, Script};

#[tokio::test(flavor = "multi_thread")]
async fn master_reports_device_count_via_prometheus_after_a_scan() {
    let script = Script::new();
    script.set_read("/10.0123456789AB/temperature", "20.0");
    // One reply per full/alarm scan this test's polling window might trigger.
    for _ in 0..20 {
        script.push_dir(vec!["/10.0123456789AB".to_owned()]);
    }
    let owserver = FakeOwserver::spawn(script.clone()).await.expect("fake owserver spawns");

    let yaml = "owmaster:\n  stats_report_interval: 0.2\ndevices:\n  10.0123456789AB: {}\n";
    let config = Config::from_yaml_str(yaml).expect("config parses");

    let metrics_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("metrics listener binds");
    let metrics_addr = metrics_listener.local_addr().expect("listener has a local address");

    let master = Master::spawn(config, Some("127.0.0.1".to_owned()), Some(owserver.port), Some(metrics_addr.port()));
    let sink = master.prometheus_sink().expect("metrics port was configured");
    tokio::spawn(async move {
        let _ = axum::serve(metrics_listener, sink.router()).await;
    });

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    let body = loop {
        assert!(tokio::time::Instant::now() < deadline, "device count never appeared in /metrics");
        if let Ok(body) = tcp_http_get(metrics_addr, "/metrics").await {
            if body.contains("owmaster_stat{category=\"bus\",name=\"device_count\"} 1") {
                break body;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    };
    assert!(body.contains("owmaster_stat"));

    tokio::task::spawn_blocking(move || master.shutdown()).await.expect("shutdown task completes");
}
