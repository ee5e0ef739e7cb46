//! # Domain Errors
//!
//! One error enum per concern. Only [`IdentityError`] is fatal to the process;
//! every other error is logged by the service that observed it and retried on
//! the next natural trigger.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::memo::PartialCommitment;

/// Failure of a call to an external collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ServiceError {
    /// The call did not complete within its bound.
    #[error("{operation} timed out after {}s", .after.as_secs())]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Connection or transport level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The remote answered with a non-success status.
    #[error("rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The remote answered with a payload we could not interpret.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// No platform session is available yet.
    #[error("no active platform session")]
    NoSession,
}

/// Device identity store failures. Fatal at startup.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity file {path} is unreadable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("identity file holds a malformed device id: {0:?}")]
    Malformed(String),

    #[error("could not register device id with the platform: {0}")]
    Registration(#[from] ServiceError),
}

/// Local buffer failures.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The agent is shutting down and no longer accepts telemetry.
    #[error("buffer is closed to new telemetry")]
    Closed,
}

/// Hash-chain seal failures. The buffer is left untouched on every variant.
#[derive(Debug, Error)]
pub enum SealError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("anchoring segment failed: {0}")]
    Anchor(#[from] ServiceError),
}

/// Two-part ledger commitment failures.
#[derive(Debug, Error)]
pub enum CommitError {
    /// The record does not fit into two memos. Nothing was submitted.
    #[error("record of {len} bytes exceeds two-memo capacity of {max} bytes")]
    RecordTooLong { len: usize, max: usize },

    /// Part 1 failed. Nothing was committed.
    #[error("ledger commitment failed: {0}")]
    Failed(ServiceError),

    /// Part 1 is on the ledger, part 2 is not.
    #[error("partial commitment: part 1 committed as {}, part 2 failed: {source}", .partial.tx1)]
    Partial {
        partial: PartialCommitment,
        source: ServiceError,
    },
}

/// Billing pass failures.
#[derive(Debug, Error)]
pub enum AggregationError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    /// A record could not be parsed. The energy buffer is kept for the next pass.
    #[error("malformed energy record #{record} (partial sum {partial_sum}): {reason}")]
    Malformed {
        record: usize,
        partial_sum: u64,
        reason: String,
    },
}

/// State update failures.
#[derive(Debug, Error)]
pub enum StateUpdateError {
    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("state snapshot failed: {0}")]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Commit(#[from] CommitError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TxId;

    #[test]
    fn test_timeout_display() {
        let err = ServiceError::Timeout {
            operation: "put_bytes",
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "put_bytes timed out after 30s");
    }

    #[test]
    fn test_partial_display_names_first_tx() {
        let err = CommitError::Partial {
            partial: PartialCommitment {
                tx1: TxId::new("tx-1"),
                destination: "GDEST".to_string(),
                amount: 1,
                second_memo: "rest".to_string(),
            },
            source: ServiceError::Transport("reset".to_string()),
        };
        let msg = err.to_string();
        assert!(msg.contains("tx-1"));
        assert!(msg.contains("reset"));
    }

    #[test]
    fn test_record_too_long_display() {
        let err = CommitError::RecordTooLong { len: 60, max: 56 };
        assert_eq!(
            err.to_string(),
            "record of 60 bytes exceeds two-memo capacity of 56 bytes"
        );
    }

    #[test]
    fn test_malformed_display() {
        let err = AggregationError::Malformed {
            record: 2,
            partial_sum: 30,
            reason: "expected value".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "malformed energy record #2 (partial sum 30): expected value"
        );
    }
}
