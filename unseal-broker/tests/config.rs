use std::io::Write;

use serial_test::serial;
use unseal_broker::{BrokerConfig, ConfigOverrides, LogFormat};

const VARS: [&str; 5] = [
    "UNSEAL_HOST",
    "UNSEAL_PORT",
    "UNSEAL_LOG_FORMAT",
    "UNSEAL_LOG_LEVEL",
    "UNSEAL_ROOT_TOKEN",
];

fn clear_env() {
    for var in VARS {
        // SAFETY: these tests are serialised and own the process environment.
        unsafe { std::env::remove_var(var) };
    }
}

fn write_config(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    file.write_all(contents.as_bytes()).expect("write config");
    file
}

#[test]
#[serial]
fn file_values_apply_over_defaults() {
    clear_env();
    let file = write_config(
        r#"
        host = "127.0.0.1"
        port = 8300
        log_format = "json"
        "#,
    );

    let config = BrokerConfig::load(Some(file.path()), &ConfigOverrides::default()).unwrap();
    assert_eq!(config.http_addr().unwrap().to_string(), "127.0.0.1:8300");
    assert_eq!(config.log_format, LogFormat::Json);
    assert_eq!(config.log_level, "info");
}

#[test]
#[serial]
fn env_beats_file_and_flags_beat_env() {
    clear_env();
    let file = write_config("port = 8300\nlog_level = \"warn\"\n");
    // SAFETY: serialised test.
    unsafe {
        std::env::set_var("UNSEAL_PORT", "8400");
        std::env::set_var("UNSEAL_LOG_LEVEL", "debug");
        std::env::set_var("UNSEAL_ROOT_TOKEN", "env-root");
    }

    let overrides = ConfigOverrides {
        port: Some(8500),
        ..Default::default()
    };
    let config = BrokerConfig::load(Some(file.path()), &overrides).unwrap();
    clear_env();

    assert_eq!(config.port, 8500);
    assert_eq!(config.log_level, "debug");
    assert_eq!(config.root_token.as_deref(), Some("env-root"));
}

#[test]
#[serial]
fn invalid_sources_fail_with_context() {
    clear_env();
    let file = write_config("listen = \"0.0.0.0\"\n");
    let err = BrokerConfig::load(Some(file.path()), &ConfigOverrides::default()).unwrap_err();
    assert!(format!("{err:#}").contains("failed to parse config file"));

    let missing = std::path::Path::new("/nonexistent/unseal.toml");
    let err = BrokerConfig::load(Some(missing), &ConfigOverrides::default()).unwrap_err();
    assert!(format!("{err:#}").contains("failed to read config file"));

    // SAFETY: serialised test.
    unsafe { std::env::set_var("UNSEAL_LOG_FORMAT", "xml") };
    let err = BrokerConfig::load(None, &ConfigOverrides::default()).unwrap_err();
    clear_env();
    assert!(format!("{err:#}").contains("UNSEAL_LOG_FORMAT"));
}
