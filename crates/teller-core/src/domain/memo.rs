//! Ledger memo splitting.
//!
//! A ledger transaction memo holds at most [`MEMO_CAPACITY`] bytes, which is
//! too small for a tagged content id. Records are split into two memos whose
//! concatenation, in submission order, is the full record.

use std::fmt;

use super::errors::CommitError;

/// Maximum memo payload of one ledger transaction, in bytes.
pub const MEMO_CAPACITY: usize = 28;

/// Tag of the shutdown commitment record.
pub const SHUTDOWN_TAG: &str = "IPFSHASH: ";

/// Tag of the periodic state update record.
pub const STATE_UPDATE_TAG: &str = "STATUPD: ";

/// Ledger transaction identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A record split into two ordered memos.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoSplit {
    pub first: String,
    pub second: String,
}

/// Both halves of a record are on the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerCommitment {
    pub tx1: TxId,
    pub tx2: TxId,
}

/// Part 1 is on the ledger; part 2 still has to be submitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialCommitment {
    pub tx1: TxId,
    pub destination: String,
    pub amount: u64,
    pub second_memo: String,
}

/// Split `record` at `capacity` bytes, backing off to a char boundary.
///
/// The second memo may be empty. Fails when the remainder would not fit.
pub fn split_memo(record: &str, capacity: usize) -> Result<MemoSplit, CommitError> {
    let too_long = || CommitError::RecordTooLong {
        len: record.len(),
        max: capacity * 2,
    };

    if capacity == 0 {
        return Err(too_long());
    }

    let mut at = capacity.min(record.len());
    while !record.is_char_boundary(at) {
        at -= 1;
    }

    let (first, second) = record.split_at(at);
    if second.len() > capacity {
        return Err(too_long());
    }

    Ok(MemoSplit {
        first: first.to_string(),
        second: second.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const CID: &str = "QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG";

    #[test]
    fn test_shutdown_record_fills_both_memos() {
        let record = format!("{}{}", SHUTDOWN_TAG, CID);
        let split = split_memo(&record, MEMO_CAPACITY).unwrap();

        assert_eq!(split.first.len(), MEMO_CAPACITY);
        assert_eq!(split.second.len(), record.len() - MEMO_CAPACITY);
        assert_eq!(format!("{}{}", split.first, split.second), record);
    }

    #[test]
    fn test_short_record_has_empty_second_memo() {
        let split = split_memo("STATUPD: Qm", MEMO_CAPACITY).unwrap();
        assert_eq!(split.first, "STATUPD: Qm");
        assert_eq!(split.second, "");
    }

    #[test]
    fn test_overlong_record_is_rejected() {
        let record = "x".repeat(MEMO_CAPACITY * 2 + 1);
        let err = split_memo(&record, MEMO_CAPACITY).unwrap_err();
        assert!(matches!(err, CommitError::RecordTooLong { len: 57, max: 56 }));
    }

    #[test]
    fn test_split_respects_char_boundary() {
        // 27 ASCII bytes followed by a two byte character straddling byte 28.
        let record = format!("{}é{}", "a".repeat(27), "b".repeat(5));
        let split = split_memo(&record, MEMO_CAPACITY).unwrap();
        assert_eq!(split.first.len(), 27);
        assert!(split.second.starts_with('é'));
        assert_eq!(format!("{}{}", split.first, split.second), record);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        assert!(split_memo("a", 0).is_err());
    }
}
