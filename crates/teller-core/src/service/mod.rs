//! # Service Layer
//!
//! The agent's long-running tasks and the components they share.
//!
//! ```text
//! StreamingLoop ──append──→ Buffers.chain ──threshold──→ HashChainSealer ──→ ContentStore
//! BillingAggregator ──merge energy──→ Buffers.chain, ──payback──→ BillingService
//! StateUpdater ──anchor──→ ContentStore ──two-part commit──→ LedgerCommitter
//! SessionRefresher ──login──→ PlatformSession
//! ShutdownHandler (once, at exit)
//! ```

pub mod aggregator;
pub mod commitment;
pub mod context;
pub mod sealer;
pub mod session;
pub mod shutdown;
pub mod state_update;
pub mod streaming;

#[cfg(test)]
mod tests;

use std::future::Future;
use std::time::Duration;

use crate::domain::ServiceError;

pub use aggregator::{AggregatorConfig, BillingAggregator, PassSummary, PaybackStatus};
pub use commitment::LedgerCommitter;
pub use context::AgentContext;
pub use sealer::HashChainSealer;
pub use session::SessionRefresher;
pub use shutdown::{ShutdownHandler, ShutdownReport};
pub use state_update::{StateUpdate, StateUpdater};
pub use streaming::{Backoff, StreamState, StreamingConfig, StreamingLoop};

/// Run `call` under a deadline, mapping expiry to [`ServiceError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, operation: &'static str, call: F) -> Result<T, ServiceError>
where
    F: Future<Output = Result<T, ServiceError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(ServiceError::Timeout {
            operation,
            after: limit,
        }),
    }
}

/// Sleep for `period` unless shutdown is signalled first.
///
/// Returns `false` when the task should stop.
pub async fn sleep_or_shutdown(
    period: Duration,
    shutdown: &mut tokio::sync::watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(period) => true,
        _ = shutdown.changed() => false,
    }
}
