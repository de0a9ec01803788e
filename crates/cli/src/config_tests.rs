use super::*;

#[test]
fn parses_minimal_args() {
    let cfg = Config::parse_from(["owmasterd", "/etc/owmaster.yml"]);
    assert_eq!(cfg.config_file, PathBuf::from("/etc/owmaster.yml"));
    assert_eq!(cfg.log_format, "text");
    assert_eq!(cfg.log_level, "info");
    assert!(cfg.metrics_port.is_none());
}

#[test]
fn parses_overrides() {
    let cfg = Config::parse_from([
        "owmasterd",
        "cfg.yml",
        "--owserver-host",
        "bus.local",
        "--owserver-port",
        "4321",
        "--metrics-port",
        "9100",
    ]);
    assert_eq!(cfg.owserver_host.as_deref(), Some("bus.local"));
    assert_eq!(cfg.owserver_port, Some(4321));
    assert_eq!(cfg.metrics_port, Some(9100));
}
