//! # Teller Core
//!
//! Field-device telemetry agent: buffers sensor telemetry on local storage,
//! seals full buffers into a content-addressed hash chain, and commits state
//! snapshots and the shutdown record to a public ledger.
//!
//! ## Domain Invariants
//!
//! | ID | Invariant | Description |
//! |----|-----------|-------------|
//! | 1 | Append-only chain | Every sealed segment starts with its predecessor's content id |
//! | 2 | No byte loss | A buffer is only reset after its contents were anchored |
//! | 3 | Ordered commitment | Memo part 2 is submitted strictly after part 1 succeeded |
//! | 4 | Stable identity | A device id is persisted only after the platform accepted it |
//! | 5 | Single instance | One agent per home directory |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Pure domain logic (identity, chain, memos, energy records)
//! - `ports/` - Outbound port traits
//! - `storage/` - File buffers, identity file, home directory lock
//! - `service/` - Long-running agent tasks
//! - `adapters/` - HTTP and in-memory port implementations
//!
//! ## Usage
//!
//! ```ignore
//! use teller_core::{AgentContext, HashChainSealer, StreamingLoop};
//!
//! let ctx = Arc::new(AgentContext::new(device_id, info, buffers, timeout));
//! let sealer = Arc::new(HashChainSealer::new(ctx.clone(), store, 2000));
//! tokio::spawn(StreamingLoop::new(ctx, source, sealer, config).run(shutdown_rx));
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;
pub mod storage;

pub use domain::errors::{
    AggregationError, BufferError, CommitError, IdentityError, SealError, ServiceError,
    StateUpdateError,
};
pub use domain::{
    AnchorRecord, ContentId, DeviceId, DeviceInfo, DeviceMeta, LedgerCommitment,
    PartialCommitment, Session, TxId, MEMO_CAPACITY,
};
pub use ports::{
    BillingService, ContentStore, LedgerService, Notifier, PlatformSession, TelemetrySource,
    TelemetryStream,
};
pub use service::{
    AgentContext, AggregatorConfig, BillingAggregator, HashChainSealer, LedgerCommitter,
    SessionRefresher, ShutdownHandler, ShutdownReport, StateUpdater, StreamingConfig,
    StreamingLoop,
};
pub use storage::{Buffers, HomeLock, IdentityStore};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
