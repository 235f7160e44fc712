use super::*;
use crate::schema::{Config, DispatchConfig, OrchestratorConfig};

#[test]
fn test_default_config_is_valid() {
    let result = ConfigValidator::validate(&Config::default()).unwrap();
    assert!(result.is_valid(), "errors: {:?}", result.errors);
}

#[test]
fn test_zero_port() {
    let mut config = Config::default();
    config.server.port = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(!result.is_valid());
    assert!(result.errors.iter().any(|e| e.path == "server.port"));
}

#[test]
fn test_invalid_time_of_day() {
    let mut config = Config::default();
    config.scan.cadence.time_of_day = "3am".to_string();

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "scan.cadence.time_of_day"));
}

#[test]
fn test_zero_frequency_and_batch_size() {
    let mut config = Config::default();
    config.scan.cadence.frequency_hours = 0;
    config.scan.batch_size = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert_eq!(result.errors.len(), 2);
}

#[test]
fn test_empty_rest_window_warning() {
    let mut config = Config::default();
    config.scan.rest_window.enabled = true;
    config.scan.rest_window.start = "01:00".to_string();
    config.scan.rest_window.end = "01:00".to_string();

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result.warnings.iter().any(|w| w.path == "scan.rest_window"));
}

#[test]
fn test_short_retry_delay_warning() {
    let config = Config {
        orchestrator: OrchestratorConfig {
            retry_delay_secs: 2,
            ..Default::default()
        },
        ..Default::default()
    };

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
    assert!(result
        .warnings
        .iter()
        .any(|w| w.path == "orchestrator.retry_delay_secs"));
}

#[test]
fn test_zero_history_capacity() {
    let mut config = Config::default();
    config.orchestrator.history_capacity = 0;

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result
        .errors
        .iter()
        .any(|e| e.path == "orchestrator.history_capacity"));
}

#[test]
fn test_dispatch_requires_url() {
    let config = Config {
        dispatch: DispatchConfig {
            enabled: true,
            url: None,
            ..Default::default()
        },
        ..Default::default()
    };

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.path == "dispatch.url"));
}

#[test]
fn test_dispatch_url_scheme() {
    let config = Config {
        dispatch: DispatchConfig {
            enabled: true,
            url: Some("ftp://example.com/cron".to_string()),
            ..Default::default()
        },
        ..Default::default()
    };

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.errors.iter().any(|e| e.message.contains("http://")));
}

#[test]
fn test_disabled_dispatch_skips_url_check() {
    let config = Config {
        dispatch: DispatchConfig {
            enabled: false,
            url: None,
            ..Default::default()
        },
        ..Default::default()
    };

    let result = ConfigValidator::validate(&config).unwrap();
    assert!(result.is_valid());
}
