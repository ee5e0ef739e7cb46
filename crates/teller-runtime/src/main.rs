//! # Teller
//!
//! Field-device telemetry agent. See `teller_runtime` for the startup and
//! shutdown sequences.

use anyhow::{Context, Result};
use tracing::{info, warn};

use teller_runtime::{wait_for_termination, AgentServices, TellerConfig, TellerRuntime};
use teller_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry = init_telemetry(TelemetryConfig::from_env())
        .context("Failed to initialize telemetry")?;

    let config = TellerConfig::from_env().context("Invalid configuration")?;
    let services = AgentServices::http(&config).context("Failed to build service clients")?;

    let agent = TellerRuntime::new(config, services).start().await?;

    info!("Teller is running. Send SIGTERM or press Ctrl+C to stop, SIGUSR1 to commit state.");
    wait_for_termination(agent.state_update_trigger()).await?;

    match agent.shutdown().await {
        Some(report) if report.is_clean() => info!("Shutdown complete"),
        Some(report) => warn!(failures = report.failures.len(), "Shutdown complete with failures"),
        None => warn!("Shutdown commitment abandoned after grace period"),
    }

    Ok(())
}
