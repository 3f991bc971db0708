//! Structured logging to stderr.
//!
//! Stdout is reserved for command output (e.g. `inspect`), so every event
//! goes to stderr in either format.

use crate::{LogFormat, TelemetryConfig, TelemetryError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Initialize the logging subsystem.
///
/// Sets up tracing-subscriber with either JSON or pretty format,
/// respecting the configured log level. Fails if a global subscriber is
/// already installed or the level is not a valid filter directive.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = build_filter(config)?;

    match config.log_format {
        LogFormat::Json => init_json_logging(filter, config.with_source_location),
        LogFormat::Pretty => init_pretty_logging(filter, config.with_source_location),
    }
}

/// `RUST_LOG` when set, the configured level otherwise.
fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            TelemetryError::InvalidLevel(format!("{}: {}", config.log_level, e))
        }),
    }
}

fn init_json_logging(filter: EnvFilter, source_location: bool) -> Result<(), TelemetryError> {
    let json_layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(source_location)
        .with_line_number(source_location)
        .with_current_span(true)
        .with_span_list(false)
        .flatten_event(true)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

fn init_pretty_logging(filter: EnvFilter, source_location: bool) -> Result<(), TelemetryError> {
    let pretty_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_file(source_location)
        .with_line_number(source_location)
        .with_filter(filter);

    tracing_subscriber::registry()
        .with(pretty_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::LoggingInit(e.to_string())
        })
}

/// Standard log event names.
pub mod events {
    /// A command is starting.
    pub const STARTUP: &str = "startup";

    /// An artifact has been written.
    pub const ARTIFACT_WRITTEN: &str = "artifact_written";

    /// A command failed.
    pub const COMMAND_FAILED: &str = "command_failed";
}

/// Helper macros for structured logging with standard fields.
///
/// These wrap the tracing macros to ensure consistent field naming.
#[macro_export]
macro_rules! log_startup {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::STARTUP,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_artifact_written {
    ($($field:tt)*) => {
        tracing::info!(
            event = $crate::logging::events::ARTIFACT_WRITTEN,
            $($field)*
        )
    };
}

#[macro_export]
macro_rules! log_command_failed {
    ($($field:tt)*) => {
        tracing::error!(
            event = $crate::logging::events::COMMAND_FAILED,
            $($field)*
        )
    };
}
