//! Shared agent state.
//!
//! Two lock domains:
//! - buffers: async mutex, may be held across the bounded anchor call of a seal
//! - everything else: `parking_lot` locks, never held across an `.await`

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::MutexGuard;

use crate::domain::{
    AnchorRecord, ChainState, ContentId, DeviceId, DeviceInfo, DeviceMeta, ServiceError, Session,
};
use crate::storage::Buffers;

/// State shared by every agent task.
pub struct AgentContext {
    device_id: DeviceId,
    device_info: DeviceInfo,
    call_timeout: Duration,
    session: RwLock<Option<Session>>,
    chain: Mutex<ChainState>,
    energy_value: AtomicU64,
    start_block_hash: Mutex<Option<String>>,
    buffers: tokio::sync::Mutex<Buffers>,
}

impl AgentContext {
    /// Build the context. The chain head is recovered from the chain buffer.
    pub fn new(
        device_id: DeviceId,
        device_info: DeviceInfo,
        buffers: Buffers,
        call_timeout: Duration,
    ) -> Self {
        let chain = ChainState::recovered(buffers.chain.head().cloned());
        Self {
            device_id,
            device_info,
            call_timeout,
            session: RwLock::new(None),
            chain: Mutex::new(chain),
            energy_value: AtomicU64::new(0),
            start_block_hash: Mutex::new(None),
            buffers: tokio::sync::Mutex::new(buffers),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Upper bound for every external call.
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn session(&self) -> Option<Session> {
        self.session.read().clone()
    }

    pub fn set_session(&self, session: Session) {
        *self.session.write() = Some(session);
    }

    /// Ledger account that receives commitments.
    pub fn destination(&self) -> Result<String, ServiceError> {
        self.session
            .read()
            .as_ref()
            .map(|s| s.recipient.public_key.clone())
            .ok_or(ServiceError::NoSession)
    }

    /// Metadata for notifications. Project index is 0 before the first login.
    pub fn device_meta(&self) -> DeviceMeta {
        DeviceMeta {
            device_id: self.device_id.clone(),
            project_index: self
                .session
                .read()
                .as_ref()
                .map(|s| s.project.index)
                .unwrap_or_default(),
            info: self.device_info.clone(),
        }
    }

    pub async fn lock_buffers(&self) -> MutexGuard<'_, Buffers> {
        self.buffers.lock().await
    }

    pub fn chain_head(&self) -> Option<ContentId> {
        self.chain.lock().head().cloned()
    }

    pub fn start_chain_head(&self) -> Option<ContentId> {
        self.chain.lock().start_head().cloned()
    }

    pub(crate) fn advance_chain(&self, content_id: ContentId, payload_len: u64) -> AnchorRecord {
        self.chain.lock().advance(content_id, payload_len)
    }

    /// Most recent sealed records, oldest first.
    pub fn chain_history(&self) -> Vec<AnchorRecord> {
        self.chain.lock().history().cloned().collect()
    }

    pub fn energy_value(&self) -> u64 {
        self.energy_value.load(Ordering::SeqCst)
    }

    pub(crate) fn set_energy_value(&self, value: u64) {
        self.energy_value.store(value, Ordering::SeqCst);
    }

    /// Ledger block hash observed at startup.
    pub fn start_block_hash(&self) -> Option<String> {
        self.start_block_hash.lock().clone()
    }

    pub fn set_start_block_hash(&self, hash: String) {
        *self.start_block_hash.lock() = Some(hash);
    }
}
