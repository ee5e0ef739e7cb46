//! # Billing Aggregator
//!
//! Runs once per payback period. A pass:
//!
//! 1. sums the complete 7-line records of the energy buffer
//! 2. clears the energy buffer, keeping a trailing incomplete record
//! 3. moves the summed bytes unchanged into the chain buffer and seals it if over threshold
//! 4. reports the energy value and submits the payback
//!
//! Steps 1 to 3 run under the buffer lock. A malformed record aborts the pass
//! before anything is written, so the next pass sees the same bytes. A failed
//! write restores the energy buffer, so no record reaches the chain twice.

use std::sync::Arc;
use std::time::Duration;

use teller_telemetry::{log_stage, metric_inc, ENERGY_VALUE, MALFORMED_PASSES, PAYBACKS};
use tokio::sync::watch;

use crate::domain::{sum_records, AggregationError, AnchorRecord, SealError};
use crate::ports::{BillingService, Notifier, PlatformSession};
use crate::service::{bounded, sleep_or_shutdown, AgentContext, HashChainSealer};

/// Period used before the first login supplies project terms.
const FALLBACK_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Overrides the project's payback period when set.
    pub period_override: Option<Duration>,
    /// Payback amount per unit of energy.
    pub unit_price: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            period_override: None,
            unit_price: 1.0,
        }
    }
}

/// What happened to the payback of a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaybackStatus {
    Submitted { amount: u64 },
    Failed { amount: u64, notified: bool },
    /// Nothing to pay, or no session to pay against.
    Skipped,
}

/// Outcome of one successful billing pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassSummary {
    pub energy_value: u64,
    pub records: usize,
    pub sealed: Option<AnchorRecord>,
    pub payback: PaybackStatus,
}

pub struct BillingAggregator {
    ctx: Arc<AgentContext>,
    sealer: Arc<HashChainSealer>,
    billing: Arc<dyn BillingService>,
    notifier: Arc<dyn Notifier>,
    platform: Arc<dyn PlatformSession>,
    config: AggregatorConfig,
}

impl BillingAggregator {
    pub fn new(
        ctx: Arc<AgentContext>,
        sealer: Arc<HashChainSealer>,
        billing: Arc<dyn BillingService>,
        notifier: Arc<dyn Notifier>,
        platform: Arc<dyn PlatformSession>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            ctx,
            sealer,
            billing,
            notifier,
            platform,
            config,
        }
    }

    /// Current timer period: the override, else the project's payback period.
    pub fn period(&self) -> Duration {
        self.config
            .period_override
            .or_else(|| self.ctx.session().map(|s| s.project.payback_period()))
            .unwrap_or(FALLBACK_PERIOD)
    }

    /// Run one billing pass.
    pub async fn run_pass(&self) -> Result<PassSummary, AggregationError> {
        let device_id = self.ctx.device_id().clone();
        self.ctx.set_energy_value(0);

        let (sum, sealed) = {
            let mut buffers = self.ctx.lock_buffers().await;
            let raw = buffers.energy.read_all()?;

            let sum = match sum_records(&raw) {
                Ok(sum) => sum,
                Err(e) => {
                    if let AggregationError::Malformed { partial_sum, .. } = &e {
                        self.ctx.set_energy_value(*partial_sum);
                        ENERGY_VALUE.set(*partial_sum as f64);
                    }
                    metric_inc!(MALFORMED_PASSES);
                    return Err(e);
                }
            };

            // The energy buffer gives up the records before the chain takes them,
            // so a failure on either side never leaves them in both.
            buffers.energy.replace(&sum.remainder)?;
            if sum.consumed > 0 {
                if let Err(e) = buffers.chain.append(&raw[..sum.consumed]) {
                    if let Err(restore) = buffers.energy.replace(&raw) {
                        log_stage!(error, "billing", "Could not restore energy buffer",
                            device_id = %device_id, error = %restore);
                    }
                    return Err(e.into());
                }
            }
            if !sum.remainder.is_empty() {
                log_stage!(warn, "billing", "Incomplete trailing record kept for next pass",
                    device_id = %device_id, bytes = sum.remainder.len());
            }

            // The records are merged now; a failed seal is retried by the next one.
            let sealed = match self.sealer.seal_if_needed(&mut buffers).await {
                Ok(sealed) => sealed,
                Err(SealError::Buffer(e)) => {
                    log_stage!(warn, "billing", "Seal after merge failed",
                        device_id = %device_id, error = %e);
                    None
                }
                // Logged by the sealer.
                Err(SealError::Anchor(_)) => None,
            };
            (sum, sealed)
        };

        self.ctx.set_energy_value(sum.total);
        ENERGY_VALUE.set(sum.total as f64);
        log_stage!(info, "billing", "Billing pass complete",
            device_id = %device_id, energy_value = sum.total, records = sum.records);

        if let Err(e) = bounded(
            self.ctx.call_timeout(),
            "report_energy",
            self.platform.report_energy(sum.total),
        )
        .await
        {
            log_stage!(warn, "billing", "Could not report energy value", device_id = %device_id, error = %e);
        }

        let payback = self.pay_back(sum.total).await;

        Ok(PassSummary {
            energy_value: sum.total,
            records: sum.records,
            sealed,
            payback,
        })
    }

    async fn pay_back(&self, energy_value: u64) -> PaybackStatus {
        let device_id = self.ctx.device_id();
        let amount = (energy_value as f64 * self.config.unit_price).round() as u64;

        let Some(session) = self.ctx.session() else {
            metric_inc!(PAYBACKS, &["skipped"]);
            log_stage!(warn, "billing", "No session, payback skipped", device_id = %device_id);
            return PaybackStatus::Skipped;
        };
        if amount == 0 {
            metric_inc!(PAYBACKS, &["skipped"]);
            log_stage!(info, "billing", "Nothing to pay back", device_id = %device_id);
            return PaybackStatus::Skipped;
        }

        let asset_code = session.project.debt_asset_code;
        match bounded(
            self.ctx.call_timeout(),
            "submit_payback",
            self.billing.submit_payback(&asset_code, amount),
        )
        .await
        {
            Ok(()) => {
                metric_inc!(PAYBACKS, &["submitted"]);
                log_stage!(info, "billing", "Payback submitted",
                    device_id = %device_id, asset_code = %asset_code, amount = amount);
                PaybackStatus::Submitted { amount }
            }
            Err(e) => {
                metric_inc!(PAYBACKS, &["failed"]);
                log_stage!(warn, "billing", "Payback failed, notifying",
                    device_id = %device_id, asset_code = %asset_code, amount = amount, error = %e);
                let meta = self.ctx.device_meta();
                let notified = match bounded(
                    self.ctx.call_timeout(),
                    "notify_payback_failed",
                    self.notifier.notify_payback_failed(&meta),
                )
                .await
                {
                    Ok(()) => true,
                    Err(e) => {
                        log_stage!(error, "billing", "Could not send payback failure notice",
                            device_id = %device_id, error = %e);
                        false
                    }
                };
                PaybackStatus::Failed { amount, notified }
            }
        }
    }

    /// Run a pass every period until shutdown. Failed passes do not stop the timer.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        log_stage!(info, "billing", "Billing aggregator started",
            device_id = %self.ctx.device_id(), period_secs = self.period().as_secs());

        while sleep_or_shutdown(self.period(), &mut shutdown).await {
            if let Err(e) = self.run_pass().await {
                log_stage!(warn, "billing", "Billing pass failed, buffers left for next pass",
                    device_id = %self.ctx.device_id(), error = %e);
            }
        }

        log_stage!(info, "billing", "Billing aggregator stopped", device_id = %self.ctx.device_id());
    }
}
