//! Structured logging setup.
//!
//! Every event emitted by the agent carries consistent fields so that log
//! shippers can index them:
//! - `device_id`: the 16 character device identity
//! - `stage`: the pipeline stage (stream, seal, commit, billing, shutdown, ...)
//! - `error`: the rendered error for failure events

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Install the global tracing subscriber.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Config(format!("invalid log filter: {}", e)))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    match (config.console_output, config.json_logs) {
        (false, _) => registry.try_init(),
        (true, true) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
        (true, false) => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .try_init(),
    }
    .map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "Logging initialized"
    );

    Ok(())
}

/// Emit an event tagged with a pipeline stage.
///
/// ```rust,ignore
/// log_stage!(warn, "seal", "anchor failed", device_id = %id, error = %e);
/// ```
#[macro_export]
macro_rules! log_stage {
    (info, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::info!(stage = $stage, $($($field)*,)? $msg)
    };
    (warn, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::warn!(stage = $stage, $($($field)*,)? $msg)
    };
    (error, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::error!(stage = $stage, $($($field)*,)? $msg)
    };
    (debug, $stage:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::debug!(stage = $stage, $($($field)*,)? $msg)
    };
}
