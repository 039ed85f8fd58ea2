//! Structured logging initialization
//!
//! Installs a JSON `fmt` layer filtered by `RUST_LOG`, falling back to a
//! default directive set when the variable is absent or invalid.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,eksbridge=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directive could not be parsed
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// The rejected directive
        filter: String,
        /// Parser message
        message: String,
    },

    /// Failed to initialize tracing subscriber (usually a second init)
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Service name recorded on startup (e.g., "eksbridge")
    pub service_name: String,
    /// Filter directive used when `RUST_LOG` is unset
    pub default_filter: String,
    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            service_name: "eksbridge".to_string(),
            default_filter: DEFAULT_LOG_FILTER.to_string(),
            json: true,
        }
    }
}

/// Build the filter: `RUST_LOG` wins, then the configured default
pub fn build_filter(config: &LoggingConfig) -> Result<EnvFilter, TelemetryError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.default_filter).map_err(|e| TelemetryError::InvalidFilter {
        filter: config.default_filter.clone(),
        message: e.to_string(),
    })
}

/// Initialize logging with the given configuration
///
/// # Example
///
/// ```ignore
/// use eksbridge_common::telemetry::{init_logging, LoggingConfig};
///
/// init_logging(LoggingConfig::default())?;
/// ```
pub fn init_logging(config: LoggingConfig) -> Result<(), TelemetryError> {
    let env_filter = build_filter(&config)?;

    // Option<Layer> implements Layer, so exactly one of these is active
    let (json_layer, text_layer) = if config.json {
        let layer = tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_file(false)
            .with_line_number(false);
        (Some(layer), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer().with_target(true)))
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    tracing::info!(service = %config.service_name, "logging initialized");
    Ok(())
}
