//! Prometheus metrics for the teller agent.
//!
//! All metrics follow the naming convention: `teller_<component>_<metric>_<unit>`

use lazy_static::lazy_static;
use prometheus::{Counter, CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // HASH CHAIN
    // =========================================================================

    /// Buffer segments sealed into the hash chain
    pub static ref SEALS: Counter = Counter::new(
        "teller_chain_seals_total",
        "Total number of buffer segments anchored and sealed"
    ).expect("metric creation failed");

    /// Seal attempts that failed to anchor
    pub static ref SEAL_FAILURES: Counter = Counter::new(
        "teller_chain_seal_failures_total",
        "Seal attempts whose anchor call failed or timed out"
    ).expect("metric creation failed");

    /// Payload bytes currently waiting in the chain buffer
    pub static ref BUFFER_BYTES: Gauge = Gauge::new(
        "teller_buffer_payload_bytes",
        "Payload bytes in the chain buffer since the last seal"
    ).expect("metric creation failed");

    // =========================================================================
    // STREAMING
    // =========================================================================

    /// Bytes received from the telemetry source
    pub static ref STREAM_BYTES: Counter = Counter::new(
        "teller_stream_received_bytes_total",
        "Telemetry bytes received from the sensor endpoint"
    ).expect("metric creation failed");

    /// Read errors on the telemetry stream
    pub static ref STREAM_READ_ERRORS: Counter = Counter::new(
        "teller_stream_read_errors_total",
        "Read errors and idle timeouts on the telemetry stream"
    ).expect("metric creation failed");

    /// Connection attempts to the telemetry source
    pub static ref STREAM_CONNECTIONS: CounterVec = CounterVec::new(
        Opts::new("teller_stream_connection_attempts_total", "Telemetry source connection attempts"),
        &["outcome"]  // outcome: connected/failed
    ).expect("metric creation failed");

    // =========================================================================
    // LEDGER
    // =========================================================================

    /// Two-part ledger commitments by outcome
    pub static ref LEDGER_COMMITS: CounterVec = CounterVec::new(
        Opts::new("teller_ledger_commitments_total", "Two-part ledger commitments"),
        &["outcome"]  // outcome: committed/partial/failed/rejected
    ).expect("metric creation failed");

    // =========================================================================
    // BILLING
    // =========================================================================

    /// Energy value summed in the last billing pass
    pub static ref ENERGY_VALUE: Gauge = Gauge::new(
        "teller_billing_energy_value",
        "Energy value accumulated by the most recent billing pass"
    ).expect("metric creation failed");

    /// Payback submissions by outcome
    pub static ref PAYBACKS: CounterVec = CounterVec::new(
        Opts::new("teller_billing_paybacks_total", "Automated payback submissions"),
        &["outcome"]  // outcome: submitted/failed/skipped
    ).expect("metric creation failed");

    /// Billing passes aborted by a malformed record
    pub static ref MALFORMED_PASSES: Counter = Counter::new(
        "teller_billing_malformed_passes_total",
        "Billing passes aborted because a record could not be parsed"
    ).expect("metric creation failed");
}

/// Keeps the registry alive for the lifetime of the process.
pub struct MetricsHandle {
    _registry: Registry,
}

/// Register all metrics with the global registry.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Chain
        Box::new(SEALS.clone()),
        Box::new(SEAL_FAILURES.clone()),
        Box::new(BUFFER_BYTES.clone()),
        // Streaming
        Box::new(STREAM_BYTES.clone()),
        Box::new(STREAM_READ_ERRORS.clone()),
        Box::new(STREAM_CONNECTIONS.clone()),
        // Ledger
        Box::new(LEDGER_COMMITS.clone()),
        // Billing
        Box::new(ENERGY_VALUE.clone()),
        Box::new(PAYBACKS.clone()),
        Box::new(MALFORMED_PASSES.clone()),
    ];

    for metric in metrics {
        REGISTRY
            .register(metric)
            .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    }

    Ok(MetricsHandle {
        _registry: REGISTRY.clone(),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}
