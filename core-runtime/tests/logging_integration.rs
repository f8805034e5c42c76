//! Logging setup as seen by a host process

use bridge_traits::time::LogLevel;
use core_runtime::logging::{
    init_logging, redact_if_sensitive, strip_path, LogFormat, LoggingConfig,
};

#[test]
fn test_partner_credentials_never_logged() {
    for field in ["password", "api_password", "api_username", "secret_key"] {
        assert_eq!(redact_if_sensitive(field, "value"), "[REDACTED]", "{}", field);
    }
}

#[test]
fn test_asset_paths_reduced_to_file_name() {
    assert_eq!(strip_path("/srv/listing-sync/assets/pike-place.jpg"), "pike-place.jpg");
    assert_eq!(strip_path("D:\\listing-sync\\assets\\hotel.png"), "hotel.png");
    assert_eq!(strip_path("hotel.png"), "hotel.png");
    assert_eq!(strip_path("/srv/assets/"), "");
}

// Only one test in this binary may install the global subscriber
#[test]
fn test_logging_installs_once() {
    let broken = LoggingConfig::default().with_filter("core_sync=[[");
    assert!(init_logging(broken).is_err());

    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_spans(false);
    assert!(init_logging(config.clone()).is_ok());
    assert!(init_logging(config).is_err());
}
