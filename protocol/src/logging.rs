//! # Structured Logging
//!
//! The library only emits `tracing` events; it never installs a subscriber
//! on its own. Applications embedding the builder can call
//! [`init_logging`] once at startup to get `RUST_LOG`-filtered output in
//! either pretty or JSON form on stderr.
//!
//! Targets worth filtering on:
//!
//! ```text
//! RUST_LOG=muse_protocol::transaction=debug,muse_protocol::vault=info
//! ```
//!
//! Secrets never appear in events. Keys are logged by their public half.

use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output for local development.
    #[default]
    Pretty,
    /// One JSON object per line, for log aggregation.
    Json,
}

impl LogFormat {
    /// Accepts "json" or "pretty" in any case; anything else is `Pretty`.
    pub fn from_str_lossy(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(LoggingError::UnknownFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unknown log format `{0}`")]
    UnknownFormat(String),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInitialized(String),
}

/// Install the global subscriber.
///
/// `default_level` applies when `RUST_LOG` is unset, e.g. `"info"` or
/// `"muse_protocol=debug"`. A second call returns
/// [`LoggingError::AlreadyInitialized`] instead of panicking.
pub fn init_logging(default_level: &str, format: LogFormat) -> Result<(), LoggingError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let installed = match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().with_writer(std::io::stderr).with_target(true))
            .try_init(),
    };
    installed.map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))?;

    tracing::info!(?format, "logging initialized");
    Ok(())
}
