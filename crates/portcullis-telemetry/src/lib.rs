//! Logging infrastructure for the Portcullis bundle compiler.
//!
//! This crate provides structured logging (pretty or JSON) on stderr and
//! the standard event names the CLI reports.
//!
//! # Usage
//!
//! ```ignore
//! use portcullis_telemetry::{LogFormat, TelemetryConfig};
//!
//! let config = TelemetryConfig::new()
//!     .with_log_level("info")
//!     .with_log_format(LogFormat::Json);
//!
//! portcullis_telemetry::init(&config)?;
//! ```

pub mod config;
pub mod logging;

pub use config::{LogFormat, TelemetryConfig};
pub use logging::events;

use thiserror::Error;

/// Telemetry errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize logging.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The log level is not a valid filter directive.
    #[error("invalid log level {0}")]
    InvalidLevel(String),
}

/// Initialize telemetry with the given configuration.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    logging::init_logging(config)
}
