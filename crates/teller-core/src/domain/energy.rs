//! Metered energy records.
//!
//! The local meter collector writes one JSON object per reading, pretty
//! printed over exactly [`RECORD_LINES`] lines:
//!
//! ```text
//! {
//!   "energy_timestamp": "2019-03-01T10:00:00Z",
//!   "unit": "Wh",
//!   "value": 10,
//!   "owner_id": "owner",
//!   "asset_id": "asset"
//! }
//! ```

use serde::Deserialize;

use super::errors::AggregationError;

/// Lines per encoded record.
pub const RECORD_LINES: usize = 7;

/// One meter reading.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EnergyRecord {
    pub energy_timestamp: String,
    pub unit: String,
    pub value: u32,
    pub owner_id: String,
    pub asset_id: String,
}

/// Result of summing a complete energy buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnergySum {
    pub total: u64,
    pub records: usize,
    /// Byte length of the complete records that were summed.
    pub consumed: usize,
    /// Raw bytes of a trailing incomplete record, kept for the next pass.
    pub remainder: Vec<u8>,
}

/// Sum every complete record in `raw`.
///
/// Offsets index the raw bytes, so callers can move `raw[..consumed]`
/// elsewhere unchanged. A record that fails to parse aborts with
/// [`AggregationError::Malformed`], carrying the sum of the records before it.
pub fn sum_records(raw: &[u8]) -> Result<EnergySum, AggregationError> {
    let mut total: u64 = 0;
    let mut records = 0;
    let mut consumed = 0;
    let mut lines = 0;
    let mut joined: Vec<u8> = Vec::new();
    let mut offset = 0;

    for line in raw.split_inclusive(|b| *b == b'\n') {
        offset += line.len();
        lines += 1;
        joined.extend(line.iter().copied().filter(|b| *b != b'\r' && *b != b'\n'));
        if lines < RECORD_LINES {
            continue;
        }

        // Only the value is read; stray bytes in text fields do not reject a record.
        let record: EnergyRecord = serde_json::from_str(&String::from_utf8_lossy(&joined))
            .map_err(|e| AggregationError::Malformed {
                record: records,
                partial_sum: total,
                reason: e.to_string(),
            })?;

        total += u64::from(record.value);
        records += 1;
        consumed = offset;
        lines = 0;
        joined.clear();
    }

    let remainder = &raw[consumed..];
    // A lone trailing blank line is not a partial record.
    let remainder = if remainder.iter().all(u8::is_ascii_whitespace) {
        Vec::new()
    } else {
        remainder.to_vec()
    };

    Ok(EnergySum {
        total,
        records,
        consumed,
        remainder,
    })
}

#[cfg(test)]
pub(crate) fn encode_record(value: u32) -> String {
    format!(
        "{{\n\"energy_timestamp\": \"2019-03-01T10:00:00Z\",\n\"unit\": \"Wh\",\n\"value\": {},\n\"owner_id\": \"owner\",\n\"asset_id\": \"asset\"\n}}\n",
        value
    )
}
