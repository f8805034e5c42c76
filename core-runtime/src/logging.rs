//! # Logging
//!
//! One-time `tracing-subscriber` setup plus the privacy helpers used when
//! logging credentials and file locations.
//!
//! ## Overview
//!
//! By default every crate of this workspace logs at the configured level and
//! the HTTP and SQL stacks are held at `warn`, so a busy import does not
//! drown in connection chatter. An explicit filter string replaces that
//! default entirely.
//!
//! ```ignore
//! use core_runtime::logging::{init_logging, LogFormat, LoggingConfig};
//! use bridge_traits::time::LogLevel;
//!
//! init_logging(
//!     LoggingConfig::default()
//!         .with_format(LogFormat::Json)
//!         .with_level(LogLevel::Debug),
//! )?;
//! ```

use crate::error::{Error, Result};
use bridge_traits::time::LogLevel;
use tracing_subscriber::{
    filter::EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt,
    Layer, Registry,
};

const OWN_TARGETS: [&str; 6] = [
    "listing_sync_workspace",
    "core_runtime",
    "core_library",
    "core_sync",
    "core_service",
    "bridge_desktop",
];

const NOISY_TARGETS: [&str; 5] = ["h2", "hyper", "reqwest", "rustls", "sqlx"];

/// Field names whose values never reach a log line
const SECRET_FIELDS: [&str; 5] = ["password", "secret", "token", "username", "authorization"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line, colored; for a developer terminal
    Pretty,
    /// One JSON object per event, span fields included
    Json,
    /// One line per event
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub format: LogFormat,
    pub level: LogLevel,
    /// `EnvFilter` directives replacing the default filter
    pub filter: Option<String>,
    /// Emit span enter/exit (pretty) or the span list (JSON)
    pub spans: bool,
    pub show_target: bool,
    pub show_thread: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: LogLevel::Info,
            filter: None,
            spans: true,
            show_target: true,
            show_thread: false,
        }
    }
}

impl LoggingConfig {
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_filter(mut self, directives: impl Into<String>) -> Self {
        self.filter = Some(directives.into());
        self
    }

    pub fn with_spans(mut self, spans: bool) -> Self {
        self.spans = spans;
        self
    }

    pub fn with_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn with_thread_info(mut self, show: bool) -> Self {
        self.show_thread = show;
        self
    }

    fn directives(&self) -> String {
        if let Some(custom) = &self.filter {
            return custom.clone();
        }
        let level = self.level.as_str();
        OWN_TARGETS
            .iter()
            .map(|target| format!("{}={}", target, level))
            .chain(NOISY_TARGETS.iter().map(|target| format!("{}=warn", target)))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Install the global subscriber
///
/// # Errors
///
/// [`Error::Config`] for an unparsable filter, or when a subscriber is
/// already installed.
pub fn init_logging(config: LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.directives())
        .map_err(|e| Error::Config(format!("log filter: {}", e)))?;

    let base = tracing_subscriber::fmt::layer()
        .with_target(config.show_target)
        .with_thread_ids(config.show_thread)
        .with_thread_names(config.show_thread);

    let output: Box<dyn Layer<Registry> + Send + Sync> = match config.format {
        LogFormat::Pretty => base
            .pretty()
            .with_span_events(if config.spans {
                FmtSpan::NEW | FmtSpan::CLOSE
            } else {
                FmtSpan::NONE
            })
            .boxed(),
        LogFormat::Json => base
            .json()
            .flatten_event(true)
            .with_current_span(config.spans)
            .with_span_list(config.spans)
            .boxed(),
        LogFormat::Compact => base.compact().boxed(),
    };

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|e| Error::Config(format!("logging already initialized: {}", e)))
}

/// Value to log for the field `field`
///
/// Credentials are replaced outright; e-mail addresses keep their first
/// character.
///
/// ```ignore
/// debug!(password = %redact_if_sensitive("password", &password), "Password resolved");
/// ```
pub fn redact_if_sensitive(field: &str, value: &str) -> String {
    let field = field.to_ascii_lowercase();
    if SECRET_FIELDS.iter().any(|secret| field.contains(secret)) {
        return "[REDACTED]".to_string();
    }

    match value.split_once('@') {
        Some((local, domain)) if domain.contains('.') => {
            let first: String = local.chars().take(1).collect();
            format!("{}***@[REDACTED]", first)
        }
        _ => value.to_string(),
    }
}

/// File name of `path`, dropping the directories
pub fn strip_path(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives_cover_workspace() {
        let directives = LoggingConfig::default()
            .with_level(LogLevel::Debug)
            .directives();

        assert!(directives.contains("core_sync=debug"));
        assert!(directives.contains("core_service=debug"));
        assert!(directives.contains("reqwest=warn"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_custom_filter_replaces_default() {
        let directives = LoggingConfig::default()
            .with_filter("core_sync::engine=trace")
            .directives();
        assert_eq!(directives, "core_sync::engine=trace");
    }

    #[test]
    fn test_redaction_rules() {
        assert_eq!(redact_if_sensitive("API_PASSWORD", "hunter2"), "[REDACTED]");
        assert_eq!(redact_if_sensitive("contact", "sales@hotel.example"), "s***@[REDACTED]");
        assert_eq!(redact_if_sensitive("company", "Pike @ Pine"), "Pike @ Pine");
        assert_eq!(redact_if_sensitive("listing_id", "12345"), "12345");
    }
}
