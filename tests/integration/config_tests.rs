use media_columns::config::{Config, ConfigError};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::tempdir;

// Environment variables are process-wide; tests touching them take turns.
static ENV_MUTEX: Mutex<()> = Mutex::new(());

fn clear_env() {
    for (key, _) in std::env::vars() {
        if key.starts_with("MEDIA_COLUMNS_") {
            std::env::remove_var(key);
        }
    }
}

#[test]
fn test_missing_file_uses_defaults() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();

    let config = Config::load_from_path(&dir.path().join("absent.toml")).unwrap();

    assert_eq!(config, Config::default());
}

#[test]
fn test_load_from_toml() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(
        &path,
        r#"
database_path = "/var/cache/media.sqlite3"
ttl_days = 30
max_entries = 1000
probe_timeout_ms = 500
ffprobe_path = "/opt/ffmpeg/bin/ffprobe"
"#,
    )
    .unwrap();

    let config = Config::load_from_path(&path).unwrap();

    assert_eq!(
        config.database_path,
        Some(PathBuf::from("/var/cache/media.sqlite3"))
    );
    assert_eq!(config.ttl_days, 30);
    assert_eq!(config.max_entries, 1000);
    assert_eq!(config.probe_timeout(), Duration::from_millis(500));
    assert_eq!(config.ffprobe_path, PathBuf::from("/opt/ffmpeg/bin/ffprobe"));
    // Untouched keys keep their defaults.
    assert_eq!(config.eviction_interval, 256);
    assert_eq!(config.touch_batch_size, 64);
}

#[test]
fn test_env_overrides_file() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "max_entries = 1000\nttl_days = 30\n").unwrap();

    std::env::set_var("MEDIA_COLUMNS_MAX_ENTRIES", "20000");
    let result = Config::load_from_path(&path);
    clear_env();

    let config = result.unwrap();
    assert_eq!(config.max_entries, 20_000);
    assert_eq!(config.ttl_days, 30);
}

#[test]
fn test_invalid_toml_is_an_error() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "max_entries = [not valid").unwrap();

    assert!(matches!(
        Config::load_from_path(&path),
        Err(ConfigError::Load(_))
    ));
}

#[test]
fn test_zero_limits_are_rejected() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "probe_timeout_ms = 0\n").unwrap();

    match Config::load_from_path(&path) {
        Err(ConfigError::Invalid { field, .. }) => assert_eq!(field, "probe_timeout_ms"),
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_saved_config_loads_back() {
    let _guard = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();
    let dir = tempdir().unwrap();
    let path = dir.path().join("settings").join("config.toml");
    let config = Config {
        max_entries: 1234,
        eviction_batch_limit: 99,
        ..Config::default()
    };

    config.save_to_path(&path).unwrap();

    assert_eq!(Config::load_from_path(&path).unwrap(), config);
}
