//! # Outbound Ports
//!
//! Traits for the external collaborators of the agent. Implementations must
//! not apply their own unbounded retries; callers bound every call with a
//! timeout.

use async_trait::async_trait;

use crate::domain::{ContentId, DeviceId, DeviceMeta, ServiceError, Session, TxId};

/// Content-addressed storage (IPFS or equivalent).
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `payload`, returning its content id.
    async fn put_bytes(&self, payload: &[u8]) -> Result<ContentId, ServiceError>;

    /// Store a UTF-8 string, returning its content id.
    async fn put_string(&self, text: &str) -> Result<ContentId, ServiceError> {
        self.put_bytes(text.as_bytes()).await
    }
}

/// Ledger transaction submission.
#[async_trait]
pub trait LedgerService: Send + Sync {
    /// Submit a payment of `amount` to `destination` carrying `memo`.
    ///
    /// `memo` is at most [`crate::domain::MEMO_CAPACITY`] bytes.
    async fn submit(&self, destination: &str, amount: u64, memo: &str)
        -> Result<TxId, ServiceError>;

    /// Hash of the most recently closed ledger block.
    async fn latest_block_hash(&self) -> Result<String, ServiceError>;
}

/// Long-lived sensor event stream.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Open a new stream.
    async fn connect(&self) -> Result<Box<dyn TelemetryStream>, ServiceError>;
}

/// One open telemetry stream.
#[async_trait]
pub trait TelemetryStream: Send {
    /// Next chunk of bytes; `Ok(None)` at end of stream.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ServiceError>;
}

/// Billing authorization (automated payback).
#[async_trait]
pub trait BillingService: Send + Sync {
    async fn submit_payback(&self, asset_code: &str, amount: u64) -> Result<(), ServiceError>;
}

/// Operator notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_shutdown(
        &self,
        meta: &DeviceMeta,
        tx1: &TxId,
        tx2: &TxId,
    ) -> Result<(), ServiceError>;

    async fn notify_payback_failed(&self, meta: &DeviceMeta) -> Result<(), ServiceError>;
}

/// Platform account operations.
#[async_trait]
pub trait PlatformSession: Send + Sync {
    /// Authenticate and fetch recipient and project terms.
    async fn login(&self) -> Result<Session, ServiceError>;

    /// Register a newly generated device id with the recipient account.
    async fn register_device(&self, device_id: &DeviceId) -> Result<(), ServiceError>;

    /// Report the energy value of the last billing pass.
    async fn report_energy(&self, value: u64) -> Result<(), ServiceError>;

    /// Append a content id to the recipient's state history.
    async fn store_state_history(&self, content_id: &ContentId) -> Result<(), ServiceError>;
}
