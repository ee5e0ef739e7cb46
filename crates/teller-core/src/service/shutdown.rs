//! # Shutdown Commitment Handler
//!
//! Runs exactly once before the process exits. Every step is best-effort: a
//! failure is logged and recorded in the [`ShutdownReport`], and the
//! remaining steps still run.
//!
//! 1. stop accepting telemetry
//! 2. capture chain heads and ledger block hashes
//! 3. anchor the shutdown record and commit its id in two parts
//! 4. notify the operator with both transaction ids
//! 5. seal whatever remains in the buffer
//! 6. record the final content id in the platform state history

use std::sync::Arc;

use teller_telemetry::log_stage;

use crate::domain::{
    AnchorRecord, CommitError, ContentId, DeviceInfo, LedgerCommitment, SHUTDOWN_TAG,
};
use crate::ports::{ContentStore, LedgerService, Notifier, PlatformSession};
use crate::service::{bounded, AgentContext, HashChainSealer, LedgerCommitter};

/// Outcome of each shutdown step.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub record_content_id: Option<ContentId>,
    pub commitment: Option<LedgerCommitment>,
    pub notified: bool,
    pub final_seal: Option<AnchorRecord>,
    pub history_stored: bool,
    /// One line per failed step.
    pub failures: Vec<String>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    fn failed(&mut self, step: &'static str, error: impl std::fmt::Display) {
        log_stage!(warn, "shutdown", "Shutdown step failed", step = step, error = %error);
        self.failures.push(format!("{}: {}", step, error));
    }
}

/// Values interpolated into the shutdown record.
pub struct ShutdownRecord<'a> {
    pub info: &'a DeviceInfo,
    pub device_id: &'a str,
    pub start_block_hash: &'a str,
    pub now_block_hash: &'a str,
    pub start_chain_head: Option<&'a ContentId>,
    pub chain_head: Option<&'a ContentId>,
}

impl std::fmt::Display for ShutdownRecord<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let head = |c: Option<&ContentId>| c.map(|c| c.as_str().to_string()).unwrap_or_default();
        write!(
            f,
            "Device Shutting down. Info: {} Device Location: {} Device Unique ID: {} \
             Start hash: {} Now hash: {} Chain head at start: {} Chain head: {}",
            self.info.info,
            self.info.location,
            self.device_id,
            self.start_block_hash,
            self.now_block_hash,
            head(self.start_chain_head),
            head(self.chain_head),
        )
    }
}

pub struct ShutdownHandler {
    ctx: Arc<AgentContext>,
    sealer: Arc<HashChainSealer>,
    store: Arc<dyn ContentStore>,
    committer: Arc<LedgerCommitter>,
    ledger: Arc<dyn LedgerService>,
    notifier: Arc<dyn Notifier>,
    platform: Arc<dyn PlatformSession>,
}

impl ShutdownHandler {
    pub fn new(
        ctx: Arc<AgentContext>,
        sealer: Arc<HashChainSealer>,
        store: Arc<dyn ContentStore>,
        committer: Arc<LedgerCommitter>,
        ledger: Arc<dyn LedgerService>,
        notifier: Arc<dyn Notifier>,
        platform: Arc<dyn PlatformSession>,
    ) -> Self {
        Self {
            ctx,
            sealer,
            store,
            committer,
            ledger,
            notifier,
            platform,
        }
    }

    pub async fn run(&self) -> ShutdownReport {
        let device_id = self.ctx.device_id().clone();
        let timeout = self.ctx.call_timeout();
        let mut report = ShutdownReport::default();
        log_stage!(info, "shutdown", "Committing shutdown record, do not power off", device_id = %device_id);

        self.ctx.lock_buffers().await.stop_accepting();

        let now_block_hash = match bounded(timeout, "latest_block_hash", self.ledger.latest_block_hash()).await {
            Ok(hash) => hash,
            Err(e) => {
                report.failed("latest_block_hash", e);
                String::new()
            }
        };
        let start_block_hash = self.ctx.start_block_hash().unwrap_or_default();
        let start_head = self.ctx.start_chain_head();
        let head = self.ctx.chain_head();

        let record = ShutdownRecord {
            info: self.ctx.device_info(),
            device_id: device_id.as_str(),
            start_block_hash: &start_block_hash,
            now_block_hash: &now_block_hash,
            start_chain_head: start_head.as_ref(),
            chain_head: head.as_ref(),
        }
        .to_string();

        match bounded(timeout, "put_string", self.store.put_string(&record)).await {
            Ok(id) => report.record_content_id = Some(id),
            Err(e) => report.failed("anchor_record", e),
        }

        if let Some(record_id) = report.record_content_id.clone() {
            let commitment = self.commit(&record_id, &mut report).await;
            report.commitment = commitment;
        }

        if let Some(commitment) = report.commitment.clone() {
            let meta = self.ctx.device_meta();
            match bounded(
                timeout,
                "notify_shutdown",
                self.notifier.notify_shutdown(&meta, &commitment.tx1, &commitment.tx2),
            )
            .await
            {
                Ok(()) => report.notified = true,
                Err(e) => report.failed("notify_shutdown", e),
            }
        }

        {
            let mut buffers = self.ctx.lock_buffers().await;
            match self.sealer.force_seal(&mut buffers).await {
                Ok(sealed) => report.final_seal = sealed,
                Err(e) => report.failed("final_seal", e),
            }
        }

        // The final segment if one was sealed, else the current head.
        if let Some(last) = report
            .final_seal
            .as_ref()
            .map(|r| r.content_id.clone())
            .or_else(|| self.ctx.chain_head())
        {
            match bounded(timeout, "store_state_history", self.platform.store_state_history(&last)).await {
                Ok(()) => report.history_stored = true,
                Err(e) => report.failed("store_state_history", e),
            }
        }

        log_stage!(info, "shutdown", "Shutdown commitment finished",
            device_id = %device_id,
            committed = report.commitment.is_some(),
            notified = report.notified,
            failures = report.failures.len());
        report
    }

    /// Two-part commit of the record id; a partial commit is resumed once.
    async fn commit(&self, record_id: &ContentId, report: &mut ShutdownReport) -> Option<LedgerCommitment> {
        let destination = match self.ctx.destination() {
            Ok(d) => d,
            Err(e) => {
                report.failed("commit", e);
                return None;
            }
        };

        match self
            .committer
            .commit(&destination, 1, SHUTDOWN_TAG, record_id.as_str())
            .await
        {
            Ok(commitment) => Some(commitment),
            Err(CommitError::Partial { partial, source }) => {
                report.failed("commit_part_2", source);
                match self.committer.resume(partial).await {
                    Ok(commitment) => Some(commitment),
                    Err(e) => {
                        report.failed("resume_part_2", e);
                        None
                    }
                }
            }
            Err(e) => {
                report.failed("commit", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_text() {
        let info = DeviceInfo {
            info: "raspberry pi".to_string(),
            location: "rooftop".to_string(),
        };
        let head = ContentId::new("QmHead");
        let record = ShutdownRecord {
            info: &info,
            device_id: "ABCDEFGH12345678",
            start_block_hash: "aaa",
            now_block_hash: "bbb",
            start_chain_head: None,
            chain_head: Some(&head),
        }
        .to_string();

        assert_eq!(
            record,
            "Device Shutting down. Info: raspberry pi Device Location: rooftop \
             Device Unique ID: ABCDEFGH12345678 Start hash: aaa Now hash: bbb \
             Chain head at start:  Chain head: QmHead"
        );
    }
}
