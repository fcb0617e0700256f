#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::net::IpAddr;

use shmbus_broker::config;

#[test]
fn deny_unknown_fields_nested() {
    let bad = r#"
version: 1
broker:
  listen: "127.0.0.1:8888"
shared_memory:
  capacty: 4096 # typo should fail
"#;

    let err = config::load_from_str(bad).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn ok_minimal_config() {
    let cfg = config::load_from_str("version: 1\n").expect("must parse");
    assert_eq!(cfg.version, 1);
    assert_eq!(cfg.broker.listen, "127.0.0.1:8888");
    assert_eq!(cfg.broker.host_ip, None);
    assert_eq!(cfg.shared_memory.name, "message_shared_mem");
    assert_eq!(cfg.shared_memory.capacity, 1024);
}

#[test]
fn full_config() {
    let ok = r#"
version: 1
broker:
  listen: "0.0.0.0:9000"
  host_ip: "10.0.0.5"
  max_frame_bytes: 65536
  delivery_timeout_ms: 200
  drain_timeout_ms: 1000
  history_limit: 0
shared_memory:
  name: "bus_a"
  dir: "/tmp"
  capacity: 4096
  lock_timeout_ms: 50
"#;
    let cfg = config::load_from_str(ok).expect("must parse");
    assert_eq!(cfg.broker.listen_addr().unwrap().port(), 9000);
    assert_eq!(cfg.broker.host_ip, Some("10.0.0.5".parse::<IpAddr>().unwrap()));
    assert_eq!(cfg.broker.history_limit, 0);
    assert_eq!(cfg.shared_memory.path(), std::path::PathBuf::from("/tmp/bus_a"));
}

#[test]
fn unsupported_version() {
    let err = config::load_from_str("version: 2\n").expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "UNSUPPORTED_VERSION");
}

#[test]
fn out_of_range_values_fail_validation() {
    let cases = [
        "version: 1\nbroker:\n  listen: \"not-an-addr\"\n",
        "version: 1\nbroker:\n  max_frame_bytes: 10\n",
        "version: 1\nbroker:\n  delivery_timeout_ms: 0\n",
        "version: 1\nshared_memory:\n  capacity: 8\n",
        "version: 1\nshared_memory:\n  name: \"../escape\"\n",
        "version: 1\nshared_memory:\n  lock_timeout_ms: 0\n",
    ];
    for c in cases {
        let err = config::load_from_str(c).expect_err(c);
        assert_eq!(err.client_code().as_str(), "BAD_REQUEST", "case={c}");
    }
}

#[test]
fn host_ip_override() {
    let mut cfg = config::load_from_str("version: 1\n").unwrap();

    cfg.apply_host_ip_override(None).unwrap();
    assert_eq!(cfg.broker.host_ip, None);

    cfg.apply_host_ip_override(Some("192.168.1.20")).unwrap();
    assert_eq!(cfg.broker.host_ip, Some("192.168.1.20".parse().unwrap()));

    let err = cfg.apply_host_ip_override(Some("nope")).expect_err("must fail");
    assert_eq!(err.client_code().as_str(), "BAD_REQUEST");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.yaml");
    let cfg = config::load_or_default(path.to_str().unwrap()).unwrap();
    assert_eq!(cfg.broker.listen, "127.0.0.1:8888");
}
