//! Structured logging setup
//!
//! JSON lines by default so log shippers can index the operation, target and
//! duration fields; plain text for local runs. `RUST_LOG` wins over the
//! configured level when set.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during telemetry initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The log level could not be parsed into a filter
    #[error("invalid log filter '{filter}': {message}")]
    Filter {
        /// The rejected filter string
        filter: String,
        /// Parser error
        message: String,
    },

    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Log line format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}

/// Configuration for telemetry initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Base level (`INFO`, `debug`, ...) or a full filter directive
    pub log_level: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Build the filter directive for a base level
///
/// Dependencies that are chatty at debug stay at their quieter defaults.
pub fn filter_directive(log_level: &str) -> String {
    let level = log_level.trim().to_ascii_lowercase();
    if level.contains('=') || level.contains(',') {
        return level;
    }
    format!("{level},kube=info,tower=warn,hyper=warn,aws_config=warn,aws_smithy_runtime=warn")
}

/// Initialize the global tracing subscriber
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = filter_directive(&config.log_level);
            EnvFilter::try_new(&directive).map_err(|e| TelemetryError::Filter {
                filter: directive.clone(),
                message: e.to_string(),
            })?
        }
    };

    // Option<Layer> implements Layer, so only one of these is active
    let json_layer = (config.format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_file(false)
            .with_line_number(false)
    });
    let text_layer = (config.format == LogFormat::Text)
        .then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()
        .map_err(|e: tracing_subscriber::util::TryInitError| {
            TelemetryError::SubscriberInit(e.to_string())
        })?;

    Ok(())
}
