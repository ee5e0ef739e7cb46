//! # Domain Layer
//!
//! Pure types and functions: identity, hash chain, memo splitting, energy
//! records, platform session and the error taxonomy.

pub mod chain;
pub mod energy;
pub mod errors;
pub mod identity;
pub mod memo;
pub mod session;

pub use chain::{
    header_line, parse_header, verify_chain, AnchorRecord, ChainState, ChainViolation, ContentId,
    CHAIN_HEADER_PREFIX,
};
pub use energy::{sum_records, EnergyRecord, EnergySum, RECORD_LINES};
pub use errors::{
    AggregationError, BufferError, CommitError, IdentityError, SealError, ServiceError,
    StateUpdateError,
};
pub use identity::{DeviceId, DeviceInfo, DeviceMeta, DEVICE_ID_LEN};
pub use memo::{
    split_memo, LedgerCommitment, MemoSplit, PartialCommitment, TxId, MEMO_CAPACITY,
    SHUTDOWN_TAG, STATE_UPDATE_TAG,
};
pub use session::{ProjectTerms, Recipient, Session};
