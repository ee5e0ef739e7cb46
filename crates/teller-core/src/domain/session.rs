//! Platform session: who the device pays and which project it serves.

use std::time::Duration;

const SECONDS_PER_WEEK: u64 = 7 * 24 * 60 * 60;

/// Recipient account the device commits records to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub username: String,
    /// Ledger account that receives every commitment transaction.
    pub public_key: String,
}

/// Terms of the project the device monitors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectTerms {
    pub index: u32,
    pub debt_asset_code: String,
    pub payback_period_weeks: u32,
}

impl ProjectTerms {
    /// Payback period as a duration. Never zero.
    pub fn payback_period(&self) -> Duration {
        Duration::from_secs(u64::from(self.payback_period_weeks.max(1)) * SECONDS_PER_WEEK)
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub recipient: Recipient,
    pub project: ProjectTerms,
}
