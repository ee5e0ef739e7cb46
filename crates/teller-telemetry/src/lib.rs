//! # Teller Telemetry
//!
//! Logging and metrics for the teller agent.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use teller_telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(TelemetryConfig::from_env())?;
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `TELLER_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `TELLER_JSON_LOGS` | `false` | JSON formatted logs |
//! | `TELLER_CONSOLE_OUTPUT` | `true` | Write logs to stdout |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    encode_metrics, register_metrics, MetricsHandle, BUFFER_BYTES, ENERGY_VALUE, LEDGER_COMMITS,
    MALFORMED_PASSES, PAYBACKS, SEALS, SEAL_FAILURES, STREAM_BYTES, STREAM_CONNECTIONS,
    STREAM_READ_ERRORS,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and register metrics.
///
/// Returns a guard that must be held for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    let metrics = register_metrics()?;
    init_logging(&config)?;

    Ok(TelemetryGuard { _metrics: metrics })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        match encode_metrics() {
            Ok(snapshot) => tracing::debug!(metrics = %snapshot, "Final metrics snapshot"),
            Err(e) => tracing::warn!(error = %e, "Could not encode final metrics"),
        }
    }
}

/// Increment a counter, optionally selecting a label set.
#[macro_export]
macro_rules! metric_inc {
    ($metric:expr) => {
        $metric.inc()
    };
    ($metric:expr, $labels:expr) => {
        $metric.with_label_values($labels).inc()
    };
}
