use super::settings::{FlushPolicy, OverflowPolicy, Settings};
use super::{load_config, load_config_from};
use serial_test::serial;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert_eq!(settings.log.level, "info");
    assert_eq!(settings.ingest.buffer_capacity, 1000);
    assert_eq!(settings.ingest.backoff_initial_ms, 1000);
    assert_eq!(settings.ingest.backoff_max_ms, 60_000);
    assert_eq!(settings.ingest.max_reconnect_attempts, None);
    assert_eq!(settings.ingest.overflow_policy, OverflowPolicy::DropOldest);
    assert_eq!(settings.ingest.flush_policy, FlushPolicy::Sync);
}

#[test]
#[serial]
fn load_config_without_sources_uses_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let missing = tmp.path().join("nothing-here");
    let cfg = load_config_from(missing.to_str().unwrap()).expect("load_config failed");
    assert_eq!(cfg.server.port, 8080);
    assert_eq!(cfg.ingest.queue_capacity, 1024);
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    let tmp = TempDir::new().expect("create tempdir");
    let path = tmp.path().join("ingest.toml");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [ingest]
        buffer_capacity = 50
        overflow_policy = "drop-newest"
        flush_policy = "batched"
        max_reconnect_attempts = 5
    "#;
    fs::write(&path, toml).expect("write config file");

    let base = tmp.path().join("ingest");
    let cfg = load_config_from(base.to_str().unwrap()).expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.ingest.buffer_capacity, 50);
    assert_eq!(cfg.ingest.overflow_policy, OverflowPolicy::DropNewest);
    assert_eq!(cfg.ingest.flush_policy, FlushPolicy::Batched);
    assert_eq!(cfg.ingest.max_reconnect_attempts, Some(5));
    // untouched fields keep their defaults
    assert_eq!(cfg.ingest.queue_capacity, 1024);
    assert_eq!(cfg.log.level, "info");
}

#[test]
#[serial]
fn environment_overrides_defaults() {
    temp_env::with_vars(
        [
            ("INGEST__SERVER__PORT", Some("9100")),
            ("INGEST__LOG__LEVEL", Some("debug")),
            ("INGEST__INGEST__BUFFER_CAPACITY", Some("25")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.server.port, 9100);
            assert_eq!(cfg.log.level, "debug");
            assert_eq!(cfg.ingest.buffer_capacity, 25);
        },
    );
}
