//! # Ledger Commitment Client
//!
//! Commits a tagged record as two ordered ledger transactions to the same
//! destination. Part 2 is submitted strictly after part 1 has been accepted
//! and a fixed spacing delay has elapsed.

use std::sync::Arc;
use std::time::Duration;

use teller_telemetry::{log_stage, LEDGER_COMMITS};

use crate::domain::{split_memo, CommitError, LedgerCommitment, PartialCommitment, TxId};
use crate::ports::LedgerService;
use crate::service::bounded;

pub struct LedgerCommitter {
    ledger: Arc<dyn LedgerService>,
    memo_capacity: usize,
    spacing: Duration,
    call_timeout: Duration,
}

impl LedgerCommitter {
    pub fn new(
        ledger: Arc<dyn LedgerService>,
        memo_capacity: usize,
        spacing: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            memo_capacity,
            spacing,
            call_timeout,
        }
    }

    /// Commit `tag + payload` as two transactions paying `amount` to `destination`.
    pub async fn commit(
        &self,
        destination: &str,
        amount: u64,
        tag: &str,
        payload: &str,
    ) -> Result<LedgerCommitment, CommitError> {
        let record = format!("{}{}", tag, payload);
        let split = split_memo(&record, self.memo_capacity).map_err(|e| {
            LEDGER_COMMITS.with_label_values(&["rejected"]).inc();
            e
        })?;

        let tx1 = match self.submit(destination, amount, &split.first).await {
            Ok(tx) => tx,
            Err(e) => {
                LEDGER_COMMITS.with_label_values(&["failed"]).inc();
                log_stage!(warn, "commit", "Part 1 submission failed", tag = tag, error = %e);
                return Err(CommitError::Failed(e));
            }
        };

        self.finish(PartialCommitment {
            tx1,
            destination: destination.to_string(),
            amount,
            second_memo: split.second,
        })
        .await
    }

    /// Submit only part 2 of a commitment whose part 1 is already on the ledger.
    pub async fn resume(&self, partial: PartialCommitment) -> Result<LedgerCommitment, CommitError> {
        log_stage!(info, "commit", "Resuming partial commitment", tx1 = %partial.tx1);
        self.finish(partial).await
    }

    async fn finish(&self, partial: PartialCommitment) -> Result<LedgerCommitment, CommitError> {
        tokio::time::sleep(self.spacing).await;

        match self
            .submit(&partial.destination, partial.amount, &partial.second_memo)
            .await
        {
            Ok(tx2) => {
                LEDGER_COMMITS.with_label_values(&["committed"]).inc();
                log_stage!(info, "commit", "Record committed", tx1 = %partial.tx1, tx2 = %tx2);
                Ok(LedgerCommitment {
                    tx1: partial.tx1,
                    tx2,
                })
            }
            Err(source) => {
                LEDGER_COMMITS.with_label_values(&["partial"]).inc();
                log_stage!(warn, "commit", "Part 2 submission failed, commitment is partial",
                    tx1 = %partial.tx1, error = %source);
                Err(CommitError::Partial { partial, source })
            }
        }
    }

    async fn submit(
        &self,
        destination: &str,
        amount: u64,
        memo: &str,
    ) -> Result<TxId, crate::domain::ServiceError> {
        bounded(
            self.call_timeout,
            "ledger_submit",
            self.ledger.submit(destination, amount, memo),
        )
        .await
    }
}
