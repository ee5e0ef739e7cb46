//! Telemetry configuration from environment variables.

use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped on the startup event
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error) or a full directive
    pub log_level: String,

    /// Whether to write logs to stdout at all
    pub console_output: bool,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "teller".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TELLER_SERVICE_NAME`: Service name (default: teller)
    /// - `TELLER_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `TELLER_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `TELLER_JSON_LOGS`: Enable JSON logs (default: false, true under systemd)
    pub fn from_env() -> Self {
        // journald sets INVOCATION_ID for every unit it starts.
        let under_supervisor = env::var("INVOCATION_ID").is_ok();

        Self {
            service_name: env::var("TELLER_SERVICE_NAME").unwrap_or_else(|_| "teller".to_string()),

            log_level: env::var("TELLER_LOG_LEVEL")
                .or_else(|_| env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string()),

            console_output: env::var("TELLER_CONSOLE_OUTPUT")
                .map(|v| parse_flag(&v))
                .unwrap_or(true),

            json_logs: env::var("TELLER_JSON_LOGS")
                .map(|v| parse_flag(&v))
                .unwrap_or(under_supervisor),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}
