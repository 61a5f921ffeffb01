use super::settings::Settings;
use super::{OverflowPolicy, load_config};
use serial_test::serial;
use std::env;
use std::fs;
use tempfile::TempDir;

#[test]
fn test_default_settings() {
    let settings = Settings::default();
    assert_eq!(settings.server.host, "127.0.0.1");
    assert_eq!(settings.server.port, 8080);
    assert!(settings.server.relay_client_messages);
    assert_eq!(settings.hub.queue_capacity, 256);
    assert_eq!(settings.hub.max_connections, 1000);
    assert_eq!(settings.hub.overflow_policy, OverflowPolicy::Disconnect);
    assert_eq!(settings.logging.level, "info");
}

#[test]
#[serial]
fn load_config_from_file_overrides_defaults() {
    // load_config reads config/default.toml relative to the working directory
    let tmp = TempDir::new().expect("create tempdir");
    let orig = env::current_dir().expect("current_dir");
    env::set_current_dir(tmp.path()).expect("set current dir");

    fs::create_dir_all("config").expect("create config dir");
    let toml = r#"
        [server]
        host = "0.0.0.0"
        port = 9000

        [hub]
        queue_capacity = 8
        overflow_policy = "drop_newest"
    "#;
    fs::write("config/default.toml", toml).expect("write config file");

    let cfg = load_config();
    env::set_current_dir(orig).expect("restore cwd");

    let cfg = cfg.expect("load_config failed");
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.server.port, 9000);
    assert_eq!(cfg.hub.queue_capacity, 8);
    assert_eq!(cfg.hub.overflow_policy, OverflowPolicy::DropNewest);
    // untouched keys keep their defaults
    assert_eq!(cfg.hub.max_connections, 1000);
    assert_eq!(cfg.logging.level, "info");
}

#[test]
#[serial]
fn load_config_from_env_overrides_defaults() {
    temp_env::with_vars(
        [
            ("POSTHUB_HUB__QUEUE_CAPACITY", Some("64")),
            ("POSTHUB_HUB__WRITE_TIMEOUT_MS", Some("250")),
            ("POSTHUB_LOGGING__LEVEL", Some("debug")),
        ],
        || {
            let cfg = load_config().expect("load_config failed");
            assert_eq!(cfg.hub.queue_capacity, 64);
            assert_eq!(cfg.hub.write_timeout_ms, 250);
            assert_eq!(cfg.logging.level, "debug");
            assert_eq!(cfg.server.port, 8080);
        },
    );
}
