//! In-memory port implementations for tests and dry runs.
//!
//! Each double records the calls it receives and can be switched into a
//! failing mode, the way `MockChainClient` does for chain clients.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::domain::{
    ContentId, DeviceId, DeviceMeta, ProjectTerms, Recipient, ServiceError, Session, TxId,
};
use crate::ports::{
    BillingService, ContentStore, LedgerService, Notifier, PlatformSession, TelemetrySource,
    TelemetryStream,
};

fn injected(operation: &str) -> ServiceError {
    ServiceError::Transport(format!("injected {} failure", operation))
}

// =============================================================================
// CONTENT STORE
// =============================================================================

/// Content store keyed by the SHA-256 of the payload.
#[derive(Default)]
pub struct InMemoryContentStore {
    objects: Mutex<HashMap<ContentId, Vec<u8>>>,
    puts: AtomicU64,
    should_fail: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addressing function of this store. Ids have the 46-char shape of a
    /// CIDv0 so they fit a two-part memo.
    pub fn content_id_of(payload: &[u8]) -> ContentId {
        let digest = hex::encode(Sha256::digest(payload));
        ContentId::new(format!("Qm{}", &digest[..44]))
    }

    pub fn get(&self, id: &ContentId) -> Option<Vec<u8>> {
        self.objects.lock().get(id).cloned()
    }

    /// Successful puts so far.
    pub fn put_count(&self) -> u64 {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    /// Delay every put, to exercise call timeouts.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn put_bytes(&self, payload: &[u8]) -> Result<ContentId, ServiceError> {
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(injected("put_bytes"));
        }
        let id = Self::content_id_of(payload);
        self.objects.lock().insert(id.clone(), payload.to_vec());
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }
}

// =============================================================================
// LEDGER
// =============================================================================

/// One accepted ledger submission.
#[derive(Debug, Clone)]
pub struct Submission {
    pub destination: String,
    pub amount: u64,
    pub memo: String,
    pub tx: TxId,
    pub at: Instant,
}

/// Ledger that records accepted submissions and fails selected calls.
#[derive(Default)]
pub struct RecordingLedger {
    submissions: Mutex<Vec<Submission>>,
    calls: AtomicU32,
    fail_calls: Mutex<Vec<u32>>,
    fail_all: AtomicBool,
    block_hash: Mutex<String>,
}

impl RecordingLedger {
    pub fn new() -> Self {
        let ledger = Self::default();
        *ledger.block_hash.lock() = "0".repeat(64);
        ledger
    }

    /// Fail the n-th submit call, counting from 1.
    pub fn fail_on_call(&self, n: u32) {
        self.fail_calls.lock().push(n);
    }

    pub fn set_should_fail(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::SeqCst);
    }

    pub fn set_block_hash(&self, hash: impl Into<String>) {
        *self.block_hash.lock() = hash.into();
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Memos of accepted submissions, in order.
    pub fn memos(&self) -> Vec<String> {
        self.submissions.lock().iter().map(|s| s.memo.clone()).collect()
    }
}

#[async_trait]
impl LedgerService for RecordingLedger {
    async fn submit(&self, destination: &str, amount: u64, memo: &str) -> Result<TxId, ServiceError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_all.load(Ordering::SeqCst) || self.fail_calls.lock().contains(&call) {
            return Err(injected("submit"));
        }
        let tx = TxId::new(format!("tx-{:04}", call));
        self.submissions.lock().push(Submission {
            destination: destination.to_string(),
            amount,
            memo: memo.to_string(),
            tx: tx.clone(),
            at: Instant::now(),
        });
        Ok(tx)
    }

    async fn latest_block_hash(&self) -> Result<String, ServiceError> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(injected("latest_block_hash"));
        }
        Ok(self.block_hash.lock().clone())
    }
}

// =============================================================================
// TELEMETRY SOURCE
// =============================================================================

/// One scripted stream event.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    Chunk(Vec<u8>),
    Error(String),
    /// Never resolves; exercises idle timeouts and shutdown.
    Stall,
}

/// Source that serves one scripted stream per connection.
///
/// Connections beyond the script fail, or stall when `hold_open` is set.
#[derive(Default)]
pub struct ScriptedTelemetrySource {
    scripts: Mutex<VecDeque<Vec<StreamEvent>>>,
    connects: AtomicU32,
    hold_open: AtomicBool,
}

impl ScriptedTelemetrySource {
    pub fn new(scripts: Vec<Vec<StreamEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        }
    }

    /// After the scripts run out, hand out streams that never yield.
    pub fn hold_open_when_exhausted(self) -> Self {
        self.hold_open.store(true, Ordering::SeqCst);
        self
    }

    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TelemetrySource for ScriptedTelemetrySource {
    async fn connect(&self) -> Result<Box<dyn TelemetryStream>, ServiceError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        match self.scripts.lock().pop_front() {
            Some(events) => Ok(Box::new(ScriptedStream {
                events: events.into(),
            })),
            None if self.hold_open.load(Ordering::SeqCst) => Ok(Box::new(ScriptedStream {
                events: VecDeque::from(vec![StreamEvent::Stall]),
            })),
            None => Err(ServiceError::Transport("no scripted stream left".to_string())),
        }
    }
}

struct ScriptedStream {
    events: VecDeque<StreamEvent>,
}

#[async_trait]
impl TelemetryStream for ScriptedStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ServiceError> {
        match self.events.pop_front() {
            Some(StreamEvent::Chunk(bytes)) => Ok(Some(bytes)),
            Some(StreamEvent::Error(msg)) => Err(ServiceError::Transport(msg)),
            Some(StreamEvent::Stall) => {
                self.events.push_front(StreamEvent::Stall);
                std::future::pending().await
            }
            None => Ok(None),
        }
    }
}

// =============================================================================
// BILLING / NOTIFICATIONS
// =============================================================================

/// Billing service that records paybacks.
#[derive(Default)]
pub struct RecordingBilling {
    paybacks: Mutex<Vec<(String, u64)>>,
    should_fail: AtomicBool,
}

impl RecordingBilling {
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn paybacks(&self) -> Vec<(String, u64)> {
        self.paybacks.lock().clone()
    }
}

#[async_trait]
impl BillingService for RecordingBilling {
    async fn submit_payback(&self, asset_code: &str, amount: u64) -> Result<(), ServiceError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(injected("submit_payback"));
        }
        self.paybacks.lock().push((asset_code.to_string(), amount));
        Ok(())
    }
}

/// A notification received by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Shutdown {
        meta: DeviceMeta,
        tx1: TxId,
        tx2: TxId,
    },
    PaybackFailed {
        meta: DeviceMeta,
    },
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
    should_fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_should_fail(&self, fail: bool) {
        self.should_fail.store(fail, Ordering::SeqCst);
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    fn record(&self, notice: Notice) -> Result<(), ServiceError> {
        if self.should_fail.load(Ordering::SeqCst) {
            return Err(injected("notify"));
        }
        self.notices.lock().push(notice);
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify_shutdown(&self, meta: &DeviceMeta, tx1: &TxId, tx2: &TxId) -> Result<(), ServiceError> {
        self.record(Notice::Shutdown {
            meta: meta.clone(),
            tx1: tx1.clone(),
            tx2: tx2.clone(),
        })
    }

    async fn notify_payback_failed(&self, meta: &DeviceMeta) -> Result<(), ServiceError> {
        self.record(Notice::PaybackFailed { meta: meta.clone() })
    }
}

// =============================================================================
// PLATFORM
// =============================================================================

/// Platform with a fixed session that records every account operation.
pub struct InMemoryPlatform {
    session: Mutex<Session>,
    registered: Mutex<Vec<DeviceId>>,
    energy_reports: Mutex<Vec<u64>>,
    state_history: Mutex<Vec<ContentId>>,
    logins: AtomicU32,
    fail_login: AtomicBool,
    fail_registration: AtomicBool,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::with_session(Self::sample_session())
    }
}

impl InMemoryPlatform {
    pub fn with_session(session: Session) -> Self {
        Self {
            session: Mutex::new(session),
            registered: Mutex::new(Vec::new()),
            energy_reports: Mutex::new(Vec::new()),
            state_history: Mutex::new(Vec::new()),
            logins: AtomicU32::new(0),
            fail_login: AtomicBool::new(false),
            fail_registration: AtomicBool::new(false),
        }
    }

    /// Session used by [`Default`].
    pub fn sample_session() -> Session {
        Session {
            recipient: Recipient {
                username: "recipient".to_string(),
                public_key: "GRECIPIENTPUBLICKEY".to_string(),
            },
            project: ProjectTerms {
                index: 7,
                debt_asset_code: "DEBT7".to_string(),
                payback_period_weeks: 1,
            },
        }
    }

    pub fn set_session(&self, session: Session) {
        *self.session.lock() = session;
    }

    pub fn fail_login(&self, fail: bool) {
        self.fail_login.store(fail, Ordering::SeqCst);
    }

    pub fn fail_registration(&self, fail: bool) {
        self.fail_registration.store(fail, Ordering::SeqCst);
    }

    pub fn login_count(&self) -> u32 {
        self.logins.load(Ordering::SeqCst)
    }

    pub fn registered_devices(&self) -> Vec<DeviceId> {
        self.registered.lock().clone()
    }

    pub fn energy_reports(&self) -> Vec<u64> {
        self.energy_reports.lock().clone()
    }

    pub fn state_history(&self) -> Vec<ContentId> {
        self.state_history.lock().clone()
    }
}

#[async_trait]
impl PlatformSession for InMemoryPlatform {
    async fn login(&self) -> Result<Session, ServiceError> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self.fail_login.load(Ordering::SeqCst) {
            return Err(injected("login"));
        }
        Ok(self.session.lock().clone())
    }

    async fn register_device(&self, device_id: &DeviceId) -> Result<(), ServiceError> {
        if self.fail_registration.load(Ordering::SeqCst) {
            return Err(injected("register_device"));
        }
        self.registered.lock().push(device_id.clone());
        Ok(())
    }

    async fn report_energy(&self, value: u64) -> Result<(), ServiceError> {
        self.energy_reports.lock().push(value);
        Ok(())
    }

    async fn store_state_history(&self, content_id: &ContentId) -> Result<(), ServiceError> {
        self.state_history.lock().push(content_id.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get_returns_bytes() {
        let store = InMemoryContentStore::new();
        let id = store.put_bytes(b"segment").await.unwrap();
        assert_eq!(store.get(&id).unwrap(), b"segment");
        assert_eq!(id, InMemoryContentStore::content_id_of(b"segment"));
        assert_eq!(id.as_str().len(), 46);
    }

    #[tokio::test]
    async fn test_put_string_matches_put_bytes() {
        let store = InMemoryContentStore::new();
        let a = store.put_string("hello").await.unwrap();
        let b = store.put_bytes(b"hello").await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_ledger_fail_on_call_skips_recording() {
        let ledger = RecordingLedger::new();
        ledger.fail_on_call(2);
        assert!(ledger.submit("G", 1, "a").await.is_ok());
        assert!(ledger.submit("G", 1, "b").await.is_err());
        assert!(ledger.submit("G", 1, "c").await.is_ok());
        assert_eq!(ledger.memos(), vec!["a".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_scripted_source_replays_then_fails() {
        let source = ScriptedTelemetrySource::new(vec![vec![
            StreamEvent::Chunk(b"x".to_vec()),
            StreamEvent::Error("glitch".to_string()),
        ]]);
        let mut stream = source.connect().await.unwrap();
        assert_eq!(stream.next_chunk().await.unwrap(), Some(b"x".to_vec()));
        assert!(stream.next_chunk().await.is_err());
        assert_eq!(stream.next_chunk().await.unwrap(), None);
        assert!(source.connect().await.is_err());
        assert_eq!(source.connect_count(), 2);
    }
}
