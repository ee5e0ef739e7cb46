//! # Hash Chain
//!
//! Each sealed buffer segment is anchored in a content-addressed store and the
//! buffer is recreated with a header line naming the segment's content id:
//!
//! ```text
//! IPFSHASHCHAIN: <content id of previous segment>\n
//! <payload appended since the seal>
//! ```
//!
//! The header is part of the next segment, so every anchored segment embeds
//! the id of its predecessor and the chain can be replayed from the store.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};

/// Prefix of the chain-head header line written at the top of the buffer.
pub const CHAIN_HEADER_PREFIX: &str = "IPFSHASHCHAIN: ";

/// Sealed records kept in memory for reporting.
const MAX_HISTORY: usize = 256;

/// Identifier returned by the content-addressed store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentId(String);

impl ContentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One link of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnchorRecord {
    pub content_id: ContentId,
    pub previous: Option<ContentId>,
    /// Payload bytes in the segment, header excluded.
    pub payload_len: u64,
    pub sealed_at: DateTime<Utc>,
}

/// Render the header line for a new buffer lifetime.
pub fn header_line(head: &ContentId) -> String {
    format!("{}{}\n", CHAIN_HEADER_PREFIX, head)
}

/// Parse a header line at the start of `bytes`.
///
/// Returns the content id and the header length in bytes.
pub fn parse_header(bytes: &[u8]) -> Option<(ContentId, usize)> {
    let prefix = CHAIN_HEADER_PREFIX.as_bytes();
    if !bytes.starts_with(prefix) {
        return None;
    }
    let end = bytes.iter().position(|b| *b == b'\n')?;
    let id = std::str::from_utf8(&bytes[prefix.len()..end]).ok()?.trim();
    if id.is_empty() {
        return None;
    }
    Some((ContentId::new(id), end + 1))
}

/// In-memory view of the chain: current head, head at process start and the
/// most recent sealed records.
#[derive(Debug, Default)]
pub struct ChainState {
    head: Option<ContentId>,
    start_head: Option<ContentId>,
    history: VecDeque<AnchorRecord>,
}

impl ChainState {
    /// Start from the head recovered from the buffer header, if any.
    pub fn recovered(head: Option<ContentId>) -> Self {
        Self {
            start_head: head.clone(),
            head,
            history: VecDeque::new(),
        }
    }

    pub fn head(&self) -> Option<&ContentId> {
        self.head.as_ref()
    }

    pub fn start_head(&self) -> Option<&ContentId> {
        self.start_head.as_ref()
    }

    /// Link a newly anchored segment onto the chain and make it the head.
    pub fn advance(&mut self, content_id: ContentId, payload_len: u64) -> AnchorRecord {
        let record = AnchorRecord {
            previous: self.head.replace(content_id.clone()),
            content_id,
            payload_len,
            sealed_at: Utc::now(),
        };
        if self.history.len() == MAX_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(record.clone());
        record
    }

    pub fn history(&self) -> impl Iterator<Item = &AnchorRecord> {
        self.history.iter()
    }

    pub fn sealed_count(&self) -> usize {
        self.history.len()
    }
}

/// Reasons a replayed chain fails verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainViolation {
    /// Segment and record counts differ.
    LengthMismatch { segments: usize, records: usize },
    /// Recomputed id differs from the recorded one.
    ContentMismatch { index: usize },
    /// `previous` does not name the prior record.
    BrokenLink { index: usize },
    /// The segment header does not name the prior record.
    HeaderMismatch { index: usize },
}

/// Replay sealed segments against their records.
///
/// `id_of` must be the addressing function of the store the segments were
/// anchored in. `origin` is the head the first segment was written after.
pub fn verify_chain<F>(
    origin: Option<&ContentId>,
    segments: &[Vec<u8>],
    records: &[AnchorRecord],
    id_of: F,
) -> Result<(), ChainViolation>
where
    F: Fn(&[u8]) -> ContentId,
{
    if segments.len() != records.len() {
        return Err(ChainViolation::LengthMismatch {
            segments: segments.len(),
            records: records.len(),
        });
    }

    let mut expected_prev = origin.cloned();
    for (index, (segment, record)) in segments.iter().zip(records).enumerate() {
        if id_of(segment) != record.content_id {
            return Err(ChainViolation::ContentMismatch { index });
        }
        if record.previous != expected_prev {
            return Err(ChainViolation::BrokenLink { index });
        }
        let header = parse_header(segment).map(|(id, _)| id);
        if header != expected_prev {
            return Err(ChainViolation::HeaderMismatch { index });
        }
        expected_prev = Some(record.content_id.clone());
    }
    Ok(())
}
