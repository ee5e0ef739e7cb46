//! Scenario tests across the agent services, driven by the in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::{mpsc, watch};

use super::*;
use crate::adapters::memory::{
    InMemoryContentStore, InMemoryPlatform, Notice, RecordingBilling, RecordingLedger,
    RecordingNotifier, ScriptedTelemetrySource, StreamEvent,
};
use crate::domain::energy::encode_record;
use crate::domain::{
    AggregationError, CommitError, DeviceId, DeviceInfo, ServiceError, StateUpdateError,
    SHUTDOWN_TAG, STATE_UPDATE_TAG,
};
use crate::storage::Buffers;

struct Harness {
    _dir: TempDir,
    ctx: Arc<AgentContext>,
    store: Arc<InMemoryContentStore>,
    ledger: Arc<RecordingLedger>,
    platform: Arc<InMemoryPlatform>,
    billing: Arc<RecordingBilling>,
    notifier: Arc<RecordingNotifier>,
    sealer: Arc<HashChainSealer>,
    committer: Arc<LedgerCommitter>,
}

impl Harness {
    fn new(threshold: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let buffers = Buffers::open(dir.path(), None).unwrap();
        let ctx = Arc::new(AgentContext::new(
            DeviceId::parse("ABCDEFGH12345678").unwrap(),
            DeviceInfo {
                info: "pi".to_string(),
                location: "roof".to_string(),
            },
            buffers,
            Duration::from_secs(5),
        ));
        let store = Arc::new(InMemoryContentStore::new());
        let ledger = Arc::new(RecordingLedger::new());
        let sealer = Arc::new(HashChainSealer::new(ctx.clone(), store.clone(), threshold));
        let committer = Arc::new(LedgerCommitter::new(
            ledger.clone(),
            crate::domain::MEMO_CAPACITY,
            Duration::from_secs(2),
            Duration::from_secs(5),
        ));
        Self {
            _dir: dir,
            ctx,
            store,
            ledger,
            platform: Arc::new(InMemoryPlatform::default()),
            billing: Arc::new(RecordingBilling::default()),
            notifier: Arc::new(RecordingNotifier::default()),
            sealer,
            committer,
        }
    }

    fn logged_in(threshold: u64) -> Self {
        let harness = Self::new(threshold);
        harness.ctx.set_session(InMemoryPlatform::sample_session());
        harness
    }

    fn aggregator(&self) -> BillingAggregator {
        BillingAggregator::new(
            self.ctx.clone(),
            self.sealer.clone(),
            self.billing.clone(),
            self.notifier.clone(),
            self.platform.clone(),
            AggregatorConfig::default(),
        )
    }

    fn state_updater(&self) -> StateUpdater {
        StateUpdater::new(
            self.ctx.clone(),
            self.store.clone(),
            self.committer.clone(),
            Duration::from_secs(300),
        )
    }

    fn shutdown_handler(&self) -> ShutdownHandler {
        ShutdownHandler::new(
            self.ctx.clone(),
            self.sealer.clone(),
            self.store.clone(),
            self.committer.clone(),
            self.ledger.clone(),
            self.notifier.clone(),
            self.platform.clone(),
        )
    }

    async fn write_energy(&self, text: &str) {
        self.ctx.lock_buffers().await.energy.append(text.as_bytes()).unwrap();
    }

    async fn chain_size(&self) -> u64 {
        self.ctx.lock_buffers().await.chain.size().unwrap()
    }

    async fn energy_contents(&self) -> Vec<u8> {
        self.ctx.lock_buffers().await.energy.read_all().unwrap()
    }
}

fn records(values: &[u32]) -> String {
    values.iter().map(|v| encode_record(*v)).collect()
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check().await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

// =============================================================================
// BILLING AGGREGATOR
// =============================================================================

#[tokio::test]
async fn test_billing_pass_sums_and_clears_energy_buffer() {
    let h = Harness::logged_in(2000);
    let text = records(&[10, 20, 5]);
    h.write_energy(&text).await;

    let summary = h.aggregator().run_pass().await.unwrap();

    assert_eq!(summary.energy_value, 35);
    assert_eq!(summary.records, 3);
    assert_eq!(summary.sealed, None);
    assert_eq!(summary.payback, PaybackStatus::Submitted { amount: 35 });
    assert_eq!(h.ctx.energy_value(), 35);
    assert!(h.energy_contents().await.is_empty());
    assert_eq!(h.chain_size().await, text.len() as u64);
    assert_eq!(h.store.put_count(), 0);
    assert_eq!(h.billing.paybacks(), vec![("DEBT7".to_string(), 35)]);
    assert_eq!(h.platform.energy_reports(), vec![35]);
}

#[tokio::test]
async fn test_second_pass_does_not_double_count() {
    let h = Harness::logged_in(100_000);
    h.write_energy(&records(&[10, 20])).await;
    let aggregator = h.aggregator();

    assert_eq!(aggregator.run_pass().await.unwrap().energy_value, 30);
    let second = aggregator.run_pass().await.unwrap();

    assert_eq!(second.energy_value, 0);
    assert_eq!(second.payback, PaybackStatus::Skipped);
    assert_eq!(h.billing.paybacks().len(), 1);
}

#[tokio::test]
async fn test_malformed_record_keeps_buffer_and_partial_sum() {
    let h = Harness::logged_in(2000);
    let text = format!("{}{}{}", encode_record(10), "garbage\n".repeat(7), encode_record(5));
    h.write_energy(&text).await;

    let err = h.aggregator().run_pass().await.unwrap_err();

    assert!(matches!(
        err,
        AggregationError::Malformed {
            record: 1,
            partial_sum: 10,
            ..
        }
    ));
    assert_eq!(h.ctx.energy_value(), 10);
    assert_eq!(h.energy_contents().await, text.as_bytes());
    assert_eq!(h.chain_size().await, 0);
    assert!(h.billing.paybacks().is_empty());
}

#[tokio::test]
async fn test_trailing_partial_record_is_kept() {
    let h = Harness::logged_in(2000);
    let partial = "{\n\"energy_timestamp\": \"2019-03-01T10:00:00Z\",\n";
    h.write_energy(&format!("{}{}", records(&[7]), partial)).await;

    let summary = h.aggregator().run_pass().await.unwrap();

    assert_eq!(summary.energy_value, 7);
    assert_eq!(h.energy_contents().await, partial.as_bytes());
}

#[tokio::test]
async fn test_merged_records_keep_raw_bytes() {
    let h = Harness::logged_in(2000);
    let mut raw = encode_record(3).into_bytes();
    let unit = raw.windows(2).position(|w| w == b"Wh").unwrap();
    raw[unit] = 0xFF;
    h.ctx.lock_buffers().await.energy.append(&raw).unwrap();

    let summary = h.aggregator().run_pass().await.unwrap();

    assert_eq!(summary.energy_value, 3);
    assert_eq!(h.ctx.lock_buffers().await.chain.read_all().unwrap(), raw);
    assert!(h.energy_contents().await.is_empty());
}

#[tokio::test]
async fn test_failed_energy_rewrite_leaves_chain_untouched() {
    let h = Harness::logged_in(2000);
    let text = records(&[8]);
    h.write_energy(&text).await;
    let tmp = h.ctx.lock_buffers().await.energy.path().with_extension("tmp");
    std::fs::create_dir(&tmp).unwrap();
    let aggregator = h.aggregator();

    assert!(matches!(aggregator.run_pass().await, Err(AggregationError::Buffer(_))));
    assert!(matches!(aggregator.run_pass().await, Err(AggregationError::Buffer(_))));

    assert_eq!(h.chain_size().await, 0);
    assert_eq!(h.energy_contents().await, text.as_bytes());
    assert!(h.billing.paybacks().is_empty());

    std::fs::remove_dir(&tmp).unwrap();
    assert_eq!(aggregator.run_pass().await.unwrap().energy_value, 8);
    assert_eq!(h.chain_size().await, text.len() as u64);
}

#[tokio::test]
async fn test_merged_energy_crossing_threshold_seals() {
    let h = Harness::logged_in(100);
    h.write_energy(&records(&[1, 2])).await;

    let summary = h.aggregator().run_pass().await.unwrap();

    let sealed = summary.sealed.expect("merged records should seal the chain");
    assert_eq!(sealed.previous, None);
    assert_eq!(h.store.put_count(), 1);
    assert_eq!(h.chain_size().await, 0);
}

#[tokio::test]
async fn test_payback_failure_notifies_operator() {
    let h = Harness::logged_in(2000);
    h.write_energy(&records(&[12])).await;
    h.billing.set_should_fail(true);

    let summary = h.aggregator().run_pass().await.unwrap();

    assert_eq!(
        summary.payback,
        PaybackStatus::Failed {
            amount: 12,
            notified: true
        }
    );
    let notices = h.notifier.notices();
    assert_eq!(notices.len(), 1);
    match &notices[0] {
        Notice::PaybackFailed { meta } => {
            assert_eq!(meta.device_id.as_str(), "ABCDEFGH12345678");
            assert_eq!(meta.project_index, 7);
        }
        other => panic!("unexpected notice {:?}", other),
    }
}

#[tokio::test]
async fn test_payback_without_session_is_skipped() {
    let h = Harness::new(2000);
    h.write_energy(&records(&[4])).await;

    let summary = h.aggregator().run_pass().await.unwrap();

    assert_eq!(summary.payback, PaybackStatus::Skipped);
    assert!(h.billing.paybacks().is_empty());
}

#[test]
fn test_period_prefers_override() {
    let h = Harness::logged_in(2000);
    assert_eq!(h.aggregator().period(), Duration::from_secs(7 * 24 * 60 * 60));

    let aggregator = BillingAggregator::new(
        h.ctx.clone(),
        h.sealer.clone(),
        h.billing.clone(),
        h.notifier.clone(),
        h.platform.clone(),
        AggregatorConfig {
            period_override: Some(Duration::from_secs(60)),
            unit_price: 1.0,
        },
    );
    assert_eq!(aggregator.period(), Duration::from_secs(60));
}

// =============================================================================
// STREAMING LOOP
// =============================================================================

fn fast_streaming() -> StreamingConfig {
    StreamingConfig {
        max_consecutive_errors: 2,
        idle_timeout: Duration::from_secs(60),
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(20),
    }
}

#[tokio::test]
async fn test_stream_chunks_land_in_chain_buffer() {
    let h = Harness::new(2000);
    let source = Arc::new(ScriptedTelemetrySource::new(vec![vec![
        StreamEvent::Chunk(b"event: a\n".to_vec()),
        StreamEvent::Chunk(b"event: b\n".to_vec()),
        StreamEvent::Stall,
    ]]));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let streaming = StreamingLoop::new(h.ctx.clone(), source, h.sealer.clone(), fast_streaming());
    let state = streaming.subscribe_state();
    let handle = tokio::spawn(streaming.run(shutdown_rx));

    let hr = &h;
    wait_for(move || async move { hr.chain_size().await == 18 }).await;
    assert_eq!(*state.borrow(), StreamState::Streaming);

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
    assert_eq!(*state.borrow(), StreamState::Idle);
}

#[tokio::test]
async fn test_stream_seals_when_threshold_crossed() {
    let h = Harness::new(10);
    let source = Arc::new(ScriptedTelemetrySource::new(vec![vec![
        StreamEvent::Chunk(b"123456".to_vec()),
        StreamEvent::Chunk(b"789012".to_vec()),
        StreamEvent::Stall,
    ]]));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(
        StreamingLoop::new(h.ctx.clone(), source, h.sealer.clone(), fast_streaming()).run(shutdown_rx),
    );

    let hr = &h;
    wait_for(move || async move { hr.store.put_count() == 1 }).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert_eq!(h.chain_size().await, 0);
    let head = h.ctx.chain_head().unwrap();
    assert_eq!(h.store.get(&head).unwrap(), b"123456789012");
}

#[tokio::test]
async fn test_stream_reconnects_after_end_and_errors() {
    let h = Harness::new(2000);
    let source = Arc::new(
        ScriptedTelemetrySource::new(vec![
            vec![StreamEvent::Chunk(b"one".to_vec())],
            vec![
                StreamEvent::Error("reset".to_string()),
                StreamEvent::Error("reset".to_string()),
            ],
            vec![StreamEvent::Chunk(b"two".to_vec())],
        ])
        .hold_open_when_exhausted(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(
        StreamingLoop::new(h.ctx.clone(), source.clone(), h.sealer.clone(), fast_streaming())
            .run(shutdown_rx),
    );

    let hr = &h;
    wait_for(move || async move { hr.chain_size().await == 6 }).await;
    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();

    assert!(source.connect_count() >= 3);
    assert_eq!(h.ctx.lock_buffers().await.chain.read_all().unwrap(), b"onetwo");
}

#[tokio::test]
async fn test_stream_stops_when_buffer_closed() {
    let h = Harness::new(2000);
    h.ctx.lock_buffers().await.stop_accepting();
    let source = Arc::new(ScriptedTelemetrySource::new(vec![vec![StreamEvent::Chunk(
        b"late".to_vec(),
    )]]));
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::time::timeout(
        Duration::from_secs(5),
        StreamingLoop::new(h.ctx.clone(), source, h.sealer.clone(), fast_streaming()).run(shutdown_rx),
    )
    .await
    .expect("loop should stop on its own");

    assert_eq!(h.chain_size().await, 0);
}

// =============================================================================
// STATE UPDATER
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_state_update_anchors_snapshot_and_commits() {
    let h = Harness::logged_in(2000);
    h.ctx.lock_buffers().await.append_telemetry(b"reading=42\n").unwrap();

    let update = h.state_updater().update_once().await.unwrap();

    let snapshot = h.store.get(&update.content_id).unwrap();
    assert_eq!(
        String::from_utf8(snapshot).unwrap(),
        "Device ID: ABCDEFGH12345678 UPDATESTATEreading=42\n"
    );
    let submitted = h.ledger.submissions();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].destination, "GRECIPIENTPUBLICKEY");
    assert!(submitted[0].amount > 0);
    assert_eq!(
        format!("{}{}", submitted[0].memo, submitted[1].memo),
        format!("{}{}", STATE_UPDATE_TAG, update.content_id)
    );
    // The snapshot leaves the chain buffer alone.
    assert_eq!(h.chain_size().await, 11);
}

#[tokio::test(start_paused = true)]
async fn test_state_update_resumes_partial_on_next_tick() {
    let h = Harness::logged_in(2000);
    h.ledger.fail_on_call(2);
    let mut updater = h.state_updater();

    let err = updater.update_once().await.unwrap_err();
    assert!(matches!(err, StateUpdateError::Commit(CommitError::Partial { .. })));
    let pending = updater.pending().cloned().unwrap();

    updater.update_once().await.unwrap();

    assert!(updater.pending().is_none());
    let memos = h.ledger.memos();
    // part 1, resumed part 2, then a fresh two-part update
    assert_eq!(memos.len(), 4);
    assert_eq!(memos[1], pending.second_memo);
}

#[tokio::test]
async fn test_state_update_needs_session() {
    let h = Harness::new(2000);
    let err = h.state_updater().update_once().await.unwrap_err();
    assert!(matches!(err, StateUpdateError::Service(ServiceError::NoSession)));
    assert_eq!(h.store.put_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_state_updater_runs_on_trigger() {
    let h = Harness::logged_in(2000);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (trigger_tx, trigger_rx) = mpsc::channel(1);
    let handle = tokio::spawn(h.state_updater().run(shutdown_rx, trigger_rx));

    trigger_tx.send(()).await.unwrap();
    let hr = &h;
    wait_for(move || async move { hr.ledger.submissions().len() == 2 }).await;

    shutdown_tx.send(true).unwrap();
    handle.await.unwrap();
}

// =============================================================================
// SESSION REFRESHER
// =============================================================================

#[tokio::test]
async fn test_refresh_installs_session() {
    let h = Harness::new(2000);
    let refresher = SessionRefresher::new(h.ctx.clone(), h.platform.clone(), Duration::from_secs(60));

    refresher.refresh_once().await.unwrap();

    assert_eq!(h.ctx.session(), Some(InMemoryPlatform::sample_session()));
    assert_eq!(h.ctx.destination().unwrap(), "GRECIPIENTPUBLICKEY");
}

#[tokio::test(start_paused = true)]
async fn test_login_retry_gives_up_after_attempts() {
    let h = Harness::new(2000);
    h.platform.fail_login(true);
    let refresher = SessionRefresher::new(h.ctx.clone(), h.platform.clone(), Duration::from_secs(60));

    assert!(refresher.login_with_retry(3, Duration::from_secs(1)).await.is_err());
    assert_eq!(h.platform.login_count(), 3);
    assert!(h.ctx.session().is_none());
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_session() {
    let h = Harness::logged_in(2000);
    h.platform.fail_login(true);
    let refresher = SessionRefresher::new(h.ctx.clone(), h.platform.clone(), Duration::from_secs(60));

    assert!(refresher.refresh_once().await.is_err());
    assert!(h.ctx.session().is_some());
}

// =============================================================================
// SHUTDOWN HANDLER
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_commits_notifies_and_seals() {
    let h = Harness::logged_in(2000);
    h.ctx.set_start_block_hash("start-hash".to_string());
    h.ledger.set_block_hash("now-hash");
    h.ctx.lock_buffers().await.append_telemetry(b"tail").unwrap();

    let report = h.shutdown_handler().run().await;

    assert!(report.is_clean(), "failures: {:?}", report.failures);
    let record_id = report.record_content_id.clone().unwrap();
    let record = String::from_utf8(h.store.get(&record_id).unwrap()).unwrap();
    assert!(record.starts_with("Device Shutting down. Info: pi Device Location: roof"));
    assert!(record.contains("Start hash: start-hash Now hash: now-hash"));

    let memos = h.ledger.memos();
    assert_eq!(memos.concat(), format!("{}{}", SHUTDOWN_TAG, record_id));

    let commitment = report.commitment.clone().unwrap();
    assert!(report.notified);
    match &h.notifier.notices()[0] {
        Notice::Shutdown { tx1, tx2, .. } => {
            assert_eq!(tx1, &commitment.tx1);
            assert_eq!(tx2, &commitment.tx2);
        }
        other => panic!("unexpected notice {:?}", other),
    }

    let sealed = report.final_seal.clone().unwrap();
    assert_eq!(h.store.get(&sealed.content_id).unwrap(), b"tail");
    assert_eq!(h.platform.state_history(), vec![sealed.content_id]);
    assert!(!h.ctx.lock_buffers().await.is_accepting());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_resumes_partial_commitment_once() {
    let h = Harness::logged_in(2000);
    h.ledger.fail_on_call(2);

    let report = h.shutdown_handler().run().await;

    assert!(report.commitment.is_some());
    assert!(report.notified);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].starts_with("commit_part_2"));
    assert_eq!(h.ledger.memos().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_without_session_still_seals() {
    let h = Harness::new(2000);
    h.ctx.lock_buffers().await.append_telemetry(b"last words").unwrap();

    let report = h.shutdown_handler().run().await;

    assert!(report.commitment.is_none());
    assert!(!report.notified);
    assert!(report.final_seal.is_some());
    assert!(report.history_stored);
    assert!(h.ledger.submissions().is_empty());
    assert_eq!(h.chain_size().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_with_empty_buffer_stores_head() {
    let h = Harness::logged_in(5);
    {
        let mut buffers = h.ctx.lock_buffers().await;
        buffers.append_telemetry(b"abcdef").unwrap();
        h.sealer.seal_if_needed(&mut buffers).await.unwrap();
    }
    let head = h.ctx.chain_head().unwrap();

    let report = h.shutdown_handler().run().await;

    assert!(report.final_seal.is_none());
    assert_eq!(h.platform.state_history(), vec![head]);
}
