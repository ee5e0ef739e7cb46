//! # State Updater
//!
//! Periodically snapshots the chain buffer into the content store and commits
//! the snapshot's id to the ledger under the `STATUPD: ` tag. Each update pays
//! the recipient the current unix timestamp in base units, which orders
//! updates on the ledger. A manual trigger runs an update immediately.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use teller_telemetry::log_stage;
use tokio::sync::{mpsc, watch};

use crate::domain::{
    CommitError, ContentId, LedgerCommitment, PartialCommitment, StateUpdateError,
    STATE_UPDATE_TAG,
};
use crate::ports::ContentStore;
use crate::service::{bounded, AgentContext, LedgerCommitter};

/// A committed state snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateUpdate {
    pub content_id: ContentId,
    pub commitment: LedgerCommitment,
}

pub struct StateUpdater {
    ctx: Arc<AgentContext>,
    store: Arc<dyn ContentStore>,
    committer: Arc<LedgerCommitter>,
    interval: Duration,
    pending: Option<PartialCommitment>,
}

impl StateUpdater {
    pub fn new(
        ctx: Arc<AgentContext>,
        store: Arc<dyn ContentStore>,
        committer: Arc<LedgerCommitter>,
        interval: Duration,
    ) -> Self {
        Self {
            ctx,
            store,
            committer,
            interval,
            pending: None,
        }
    }

    /// Partial commitment waiting for its second half, if any.
    pub fn pending(&self) -> Option<&PartialCommitment> {
        self.pending.as_ref()
    }

    /// Finish a pending partial commitment, then commit a fresh snapshot.
    pub async fn update_once(&mut self) -> Result<StateUpdate, StateUpdateError> {
        let device_id = self.ctx.device_id().clone();

        if let Some(partial) = self.pending.take() {
            match self.committer.resume(partial).await {
                Ok(done) => log_stage!(info, "state", "Completed earlier partial state update",
                    device_id = %device_id, tx1 = %done.tx1, tx2 = %done.tx2),
                Err(CommitError::Partial { partial, .. }) => self.pending = Some(partial),
                Err(e) => log_stage!(warn, "state", "Could not resume partial state update",
                    device_id = %device_id, error = %e),
            }
        }

        let destination = self.ctx.destination()?;
        let snapshot = {
            let buffers = self.ctx.lock_buffers().await;
            buffers.chain.read_all()?
        };
        let text = format!(
            "Device ID: {} UPDATESTATE{}",
            device_id,
            String::from_utf8_lossy(&snapshot)
        );

        let content_id =
            bounded(self.ctx.call_timeout(), "put_string", self.store.put_string(&text)).await?;

        let amount = Utc::now().timestamp().max(0) as u64;
        let commitment = match self
            .committer
            .commit(&destination, amount, STATE_UPDATE_TAG, content_id.as_str())
            .await
        {
            Ok(commitment) => commitment,
            Err(CommitError::Partial { partial, source }) => {
                // A newer partial supersedes an unresumed older one.
                self.pending = Some(partial.clone());
                return Err(CommitError::Partial { partial, source }.into());
            }
            Err(e) => return Err(e.into()),
        };

        log_stage!(info, "state", "State updated",
            device_id = %device_id,
            content_id = %content_id,
            tx1 = %commitment.tx1,
            tx2 = %commitment.tx2);

        Ok(StateUpdate {
            content_id,
            commitment,
        })
    }

    /// Update every interval, or immediately when `trigger` fires, until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>, mut trigger: mpsc::Receiver<()>) {
        log_stage!(info, "state", "State updater started",
            device_id = %self.ctx.device_id(), interval_secs = self.interval.as_secs());
        let mut trigger_open = true;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                received = trigger.recv(), if trigger_open => {
                    if received.is_none() {
                        trigger_open = false;
                        continue;
                    }
                    log_stage!(info, "state", "Manual state update triggered", device_id = %self.ctx.device_id());
                }
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.update_once().await {
                log_stage!(warn, "state", "State update failed",
                    device_id = %self.ctx.device_id(), error = %e);
            }
        }

        log_stage!(info, "state", "State updater stopped", device_id = %self.ctx.device_id());
    }
}
