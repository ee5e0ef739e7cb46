//! # Hash-Chain Sealer
//!
//! Seals the chain buffer once its payload reaches the size threshold:
//!
//! 1. read the whole buffer (header included)
//! 2. anchor it in the content store
//! 3. link the returned id onto the chain head
//! 4. recreate the buffer holding only the new header line
//!
//! The buffer is only rewritten after a successful anchor. A failed or timed
//! out anchor leaves every byte in place and the seal is retried on the next
//! threshold check.

use std::sync::Arc;

use teller_telemetry::{log_stage, metric_inc, BUFFER_BYTES, SEALS, SEAL_FAILURES};

use crate::domain::{AnchorRecord, SealError};
use crate::ports::ContentStore;
use crate::service::{bounded, AgentContext};
use crate::storage::Buffers;

pub struct HashChainSealer {
    ctx: Arc<AgentContext>,
    store: Arc<dyn ContentStore>,
    threshold: u64,
}

impl HashChainSealer {
    pub fn new(ctx: Arc<AgentContext>, store: Arc<dyn ContentStore>, threshold: u64) -> Self {
        Self {
            ctx,
            store,
            threshold,
        }
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    /// Seal when the payload size has reached the threshold.
    pub async fn seal_if_needed(
        &self,
        buffers: &mut Buffers,
    ) -> Result<Option<AnchorRecord>, SealError> {
        let size = buffers.chain.size()?;
        BUFFER_BYTES.set(size as f64);
        if size < self.threshold {
            return Ok(None);
        }
        self.seal(buffers, size).await.map(Some)
    }

    /// Seal any non-empty payload regardless of the threshold.
    pub async fn force_seal(
        &self,
        buffers: &mut Buffers,
    ) -> Result<Option<AnchorRecord>, SealError> {
        let size = buffers.chain.size()?;
        if size == 0 {
            return Ok(None);
        }
        self.seal(buffers, size).await.map(Some)
    }

    async fn seal(&self, buffers: &mut Buffers, payload_len: u64) -> Result<AnchorRecord, SealError> {
        let device_id = self.ctx.device_id();
        let segment = buffers.chain.read_all()?;

        let content_id = match bounded(
            self.ctx.call_timeout(),
            "put_bytes",
            self.store.put_bytes(&segment),
        )
        .await
        {
            Ok(id) => id,
            Err(e) => {
                metric_inc!(SEAL_FAILURES);
                log_stage!(warn, "seal", "Anchoring segment failed, buffer kept for retry",
                    device_id = %device_id, payload_len = payload_len, error = %e);
                return Err(e.into());
            }
        };

        // The segment is on the store: link it before touching the file so a
        // failed rewrite cannot lose the chain head.
        let record = self.ctx.advance_chain(content_id, payload_len);
        if let Err(e) = buffers.chain.reset_with_header(&record.content_id) {
            log_stage!(error, "seal", "Segment anchored but buffer could not be reset",
                device_id = %device_id, content_id = %record.content_id, error = %e);
            return Err(e.into());
        }

        metric_inc!(SEALS);
        BUFFER_BYTES.set(0.0);
        log_stage!(info, "seal", "Sealed buffer segment",
            device_id = %device_id,
            content_id = %record.content_id,
            previous = ?record.previous.as_ref().map(|c| c.as_str()),
            payload_len = payload_len);

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryContentStore;
    use crate::domain::{verify_chain, DeviceId, DeviceInfo};
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(threshold: u64) -> (TempDir, Arc<AgentContext>, Arc<InMemoryContentStore>, HashChainSealer) {
        let dir = TempDir::new().unwrap();
        let buffers = Buffers::open(dir.path(), None).unwrap();
        let ctx = Arc::new(AgentContext::new(
            DeviceId::generate(),
            DeviceInfo::default(),
            buffers,
            Duration::from_secs(1),
        ));
        let store = Arc::new(InMemoryContentStore::new());
        let sealer = HashChainSealer::new(ctx.clone(), store.clone(), threshold);
        (dir, ctx, store, sealer)
    }

    #[tokio::test]
    async fn test_below_threshold_never_seals() {
        let (_dir, ctx, store, sealer) = setup(100);
        let mut buffers = ctx.lock_buffers().await;
        for chunk in [&b"0123456789"[..], &b"abcdefghij"[..], &b"xyz"[..]] {
            buffers.append_telemetry(chunk).unwrap();
            assert!(sealer.seal_if_needed(&mut buffers).await.unwrap().is_none());
        }
        assert_eq!(buffers.chain.size().unwrap(), 23);
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_crossing_threshold_seals_once() {
        let (_dir, ctx, store, sealer) = setup(100);
        let mut buffers = ctx.lock_buffers().await;
        buffers.append_telemetry(&[b'x'; 120]).unwrap();

        let record = sealer.seal_if_needed(&mut buffers).await.unwrap().unwrap();
        assert_eq!(record.previous, None);
        assert_eq!(record.payload_len, 120);
        assert_eq!(buffers.chain.size().unwrap(), 0);
        assert_eq!(store.put_count(), 1);
        assert_eq!(store.get(&record.content_id).unwrap(), vec![b'x'; 120]);
        assert_eq!(ctx.chain_head(), Some(record.content_id.clone()));

        // Nothing left to seal.
        assert!(sealer.seal_if_needed(&mut buffers).await.unwrap().is_none());
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_consecutive_seals_form_a_chain() {
        let (_dir, ctx, store, sealer) = setup(10);
        let mut buffers = ctx.lock_buffers().await;
        let mut records = Vec::new();
        let mut segments = Vec::new();
        for round in 0..4u8 {
            buffers.append_telemetry(&[b'a' + round; 12]).unwrap();
            let record = sealer.seal_if_needed(&mut buffers).await.unwrap().unwrap();
            segments.push(store.get(&record.content_id).unwrap());
            records.push(record);
        }

        for pair in records.windows(2) {
            assert_eq!(pair[1].previous.as_ref(), Some(&pair[0].content_id));
        }
        assert_eq!(
            verify_chain(None, &segments, &records, InMemoryContentStore::content_id_of),
            Ok(())
        );
    }

    #[tokio::test]
    async fn test_anchor_failure_keeps_buffer() {
        let (_dir, ctx, store, sealer) = setup(10);
        let mut buffers = ctx.lock_buffers().await;
        buffers.append_telemetry(&[b'q'; 15]).unwrap();

        store.set_should_fail(true);
        let err = sealer.seal_if_needed(&mut buffers).await.unwrap_err();
        assert!(matches!(err, SealError::Anchor(_)));
        assert_eq!(buffers.chain.size().unwrap(), 15);
        assert_eq!(ctx.chain_head(), None);

        // Retried on the next check once the store recovers.
        store.set_should_fail(false);
        buffers.append_telemetry(b"r").unwrap();
        let record = sealer.seal_if_needed(&mut buffers).await.unwrap().unwrap();
        assert_eq!(record.payload_len, 16);
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchor_timeout_keeps_buffer() {
        let (_dir, ctx, store, sealer) = setup(10);
        let mut buffers = ctx.lock_buffers().await;
        buffers.append_telemetry(&[b'q'; 15]).unwrap();

        store.set_delay(Some(Duration::from_secs(60)));
        let err = sealer.seal_if_needed(&mut buffers).await.unwrap_err();
        assert!(matches!(
            err,
            SealError::Anchor(crate::domain::ServiceError::Timeout { .. })
        ));
        assert_eq!(buffers.chain.size().unwrap(), 15);
    }

    #[tokio::test]
    async fn test_force_seal_ignores_threshold() {
        let (_dir, ctx, _store, sealer) = setup(1_000);
        let mut buffers = ctx.lock_buffers().await;
        assert!(sealer.force_seal(&mut buffers).await.unwrap().is_none());

        buffers.append_telemetry(b"tail").unwrap();
        let record = sealer.force_seal(&mut buffers).await.unwrap().unwrap();
        assert_eq!(record.payload_len, 4);
    }
}
