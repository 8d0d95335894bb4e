//! Telemetry and observability setup
//!
//! Configures structured logging with tracing and tracing-subscriber.

use std::fs::OpenOptions;
use std::sync::{Arc, Once};
use tracing_subscriber::{
    EnvFilter, fmt::writer::BoxMakeWriter, layer::SubscriberExt, util::SubscriberInitExt,
};

use crate::config::LogConfig;
use crate::error::{AppError, AppResult};

static INIT: Once = Once::new();

/// Where log lines go
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Stdout,
    Stderr,
    File(String),
}

impl Destination {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            "" | "stdout" => Destination::Stdout,
            "stderr" => Destination::Stderr,
            path => Destination::File(path.to_string()),
        }
    }

    fn make_writer(&self) -> AppResult<BoxMakeWriter> {
        Ok(match self {
            Destination::Stdout => BoxMakeWriter::new(std::io::stdout),
            Destination::Stderr => BoxMakeWriter::new(std::io::stderr),
            Destination::File(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|e| AppError::io(format!("opening log file {}", path), e))?;
                BoxMakeWriter::new(Arc::new(file))
            }
        })
    }
}

/// Default filter when `RUST_LOG` is unset
pub fn default_filter(level: &str) -> String {
    format!("dummypage={},tower_http=info", level)
}

/// Initialize tracing subscriber for structured logging
///
/// This can only be called once per process. Subsequent calls are silently ignored.
///
/// Reads the filter from the RUST_LOG environment variable, defaulting to
/// `log.level` for this crate.
///
/// # Examples
///
/// ```no_run
/// let config = dummypage::config::LogConfig::default();
/// dummypage::telemetry::init(&config).unwrap();
/// tracing::info!("Application started");
/// ```
pub fn init(config: &LogConfig) -> AppResult<()> {
    let writer = Destination::parse(&config.destination).make_writer()?;
    let level = config.level.clone();
    let json = config.json;

    INIT.call_once(move || {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter(&level)));

        let registry = tracing_subscriber::registry().with(filter);
        if json {
            registry
                .with(tracing_subscriber::fmt::layer().json().with_writer(writer))
                .init();
        } else {
            registry
                .with(tracing_subscriber::fmt::layer().with_writer(writer))
                .init();
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_parse() {
        assert_eq!(Destination::parse("stdout"), Destination::Stdout);
        assert_eq!(Destination::parse(""), Destination::Stdout);
        assert_eq!(Destination::parse("stderr"), Destination::Stderr);
        assert_eq!(
            Destination::parse("/var/log/dummypage.log"),
            Destination::File("/var/log/dummypage.log".to_string())
        );
    }

    #[test]
    fn test_default_filter_scopes_crate() {
        assert_eq!(default_filter("debug"), "dummypage=debug,tower_http=info");
    }

    #[test]
    fn test_file_destination_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        Destination::File(path.display().to_string())
            .make_writer()
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_unwritable_destination_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("app.log");
        assert!(
            Destination::File(path.display().to_string())
                .make_writer()
                .is_err()
        );
    }
}
