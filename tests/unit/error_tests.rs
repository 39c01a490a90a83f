//! Unit tests for `AppError` display formats and error behavior.

use relaycast::{AppError, GlobalConfig};

#[test]
fn multicast_error_display_starts_with_prefix() {
    let err = AppError::Multicast("join failed".into());
    assert!(err.to_string().starts_with("multicast:"));
}

#[test]
fn channel_error_display_includes_message() {
    let err = AppError::Channel("bind failed".into());
    assert_eq!(err.to_string(), "channel: bind failed");
}

#[test]
fn error_message_no_trailing_period() {
    let err = AppError::Config("port must be greater than zero".into());
    let s = err.to_string();
    assert!(
        !s.ends_with('.'),
        "error message must not end with a period: {s}"
    );
}

#[test]
fn config_error_is_distinct_from_io_error() {
    let config = AppError::Config("read failed".into());
    let io = AppError::Io("read failed".into());
    assert_ne!(config.to_string(), io.to_string());
    assert!(config.to_string().starts_with("config:"));
    assert!(io.to_string().starts_with("io:"));
}

#[test]
fn lifecycle_errors_are_distinct() {
    let already = AppError::AlreadyRunning("multicast client".into());
    let not_running = AppError::NotRunning("multicast client".into());
    let stopped = AppError::Stopped("multicast client".into());
    assert!(already.to_string().starts_with("already running:"));
    assert!(not_running.to_string().starts_with("not running:"));
    assert!(stopped.to_string().starts_with("stopped:"));
    assert_ne!(already.to_string(), not_running.to_string());
    assert_ne!(not_running.to_string(), stopped.to_string());
}

#[test]
fn toml_parse_error_converts_to_config() {
    let err = GlobalConfig::from_toml_str("port = \"not-a-number\"").expect_err("must fail");
    match err {
        AppError::Config(msg) => assert!(msg.contains("invalid config"), "got: {msg}"),
        other => panic!("expected config error, got {other:?}"),
    }
}

#[test]
fn error_implements_std_error_trait() {
    let err = AppError::Stopped("test".into());
    // Verify it implements std::error::Error via Display + Debug.
    let display = format!("{err}");
    let debug = format!("{err:?}");
    assert!(!display.is_empty());
    assert!(!debug.is_empty());
}

#[test]
fn error_debug_representation() {
    let err = AppError::AlreadyRunning("local channel listener".into());
    let debug = format!("{err:?}");
    assert!(debug.contains("AlreadyRunning"));
    assert!(debug.contains("local channel listener"));
}
