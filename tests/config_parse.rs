use bucketguard::config::{Settings, DEFAULT_MAX_FILE_SIZE};
use std::time::Duration;

#[test]
fn parse_example_settings() {
    let raw = include_str!("../bucketguard.example.toml");
    let settings = Settings::from_toml(raw).expect("parse TOML");

    assert_eq!(settings.run.batch_size, 1000);
    assert_eq!(settings.run.max_file_size, DEFAULT_MAX_FILE_SIZE);
    assert_eq!(settings.logging.max_files, 5);
    assert!(!settings.falcon.base_url.is_empty());

    let config = settings.run.to_run_config().validated().expect("valid run config");
    assert_eq!(config.poll.interval, Duration::from_secs(3));
    assert_eq!(config.poll.max_attempts, Some(200));
    assert!(config.mitigate);
}

#[test]
fn partial_settings_fall_back_to_defaults() {
    let settings = Settings::from_toml("[run]\nmax_workers = 4\n").expect("parse TOML");
    assert_eq!(settings.run.max_workers, 4);
    assert_eq!(settings.run.batch_size, 1000);
    assert_eq!(settings.logging.level, "info");
}
