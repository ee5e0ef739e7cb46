//! # Telemetry Streaming Loop
//!
//! ```text
//!        connect ok            first chunk
//! Idle ───────────→ Connected ────────────→ Streaming
//!  ↑                    │                       │
//!  └──── back-off ──────┴── end of stream / ────┘
//!                           too many read errors
//! ```
//!
//! Every chunk is appended to the chain buffer and the seal check runs under
//! the same buffer lock, so the stream is back-pressured by sealing.

use std::sync::Arc;
use std::time::Duration;

use teller_telemetry::{log_stage, STREAM_BYTES, STREAM_CONNECTIONS, STREAM_READ_ERRORS};
use tokio::sync::watch;

use crate::domain::{BufferError, SealError};
use crate::ports::{TelemetrySource, TelemetryStream};
use crate::service::{bounded, sleep_or_shutdown, AgentContext, HashChainSealer};

/// Connection state of the streaming loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Connected,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Consecutive read errors tolerated before reconnecting.
    pub max_consecutive_errors: u32,
    /// A read that yields nothing for this long counts as a read error.
    pub idle_timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            max_consecutive_errors: 5,
            idle_timeout: Duration::from_secs(120),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(60),
        }
    }
}

/// Exponential back-off, doubling up to a ceiling.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    next: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            next: base,
        }
    }

    /// Delay to wait now; the following delay doubles.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.next = self.base;
    }
}

/// Why a read session ended.
enum SessionEnd {
    Shutdown,
    Reconnect,
}

pub struct StreamingLoop {
    ctx: Arc<AgentContext>,
    source: Arc<dyn TelemetrySource>,
    sealer: Arc<HashChainSealer>,
    config: StreamingConfig,
    state: watch::Sender<StreamState>,
    backoff: Backoff,
}

impl StreamingLoop {
    pub fn new(
        ctx: Arc<AgentContext>,
        source: Arc<dyn TelemetrySource>,
        sealer: Arc<HashChainSealer>,
        config: StreamingConfig,
    ) -> Self {
        let backoff = Backoff::new(config.backoff_base, config.backoff_max);
        Self {
            ctx,
            source,
            sealer,
            config,
            state: watch::Sender::new(StreamState::Idle),
            backoff,
        }
    }

    pub fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    /// Observe state transitions while the loop runs.
    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: StreamState) {
        self.state.send_if_modified(|current| {
            let changed = *current != state;
            *current = state;
            changed
        });
    }

    /// Run until shutdown is signalled or the buffer stops accepting telemetry.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let device_id = self.ctx.device_id().clone();
        log_stage!(info, "stream", "Streaming loop started", device_id = %device_id);

        loop {
            self.set_state(StreamState::Idle);
            if *shutdown.borrow() {
                break;
            }

            let connected = tokio::select! {
                result = bounded(self.ctx.call_timeout(), "stream_connect", self.source.connect()) => result,
                _ = shutdown.changed() => break,
            };

            match connected {
                Ok(stream) => {
                    STREAM_CONNECTIONS.with_label_values(&["connected"]).inc();
                    self.set_state(StreamState::Connected);
                    log_stage!(info, "stream", "Connected to telemetry source", device_id = %device_id);
                    if let SessionEnd::Shutdown = self.read_session(stream, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    STREAM_CONNECTIONS.with_label_values(&["failed"]).inc();
                    log_stage!(warn, "stream", "Could not connect to telemetry source",
                        device_id = %device_id, error = %e);
                }
            }

            self.set_state(StreamState::Idle);
            let delay = self.backoff.next_delay();
            log_stage!(debug, "stream", "Reconnecting after back-off", delay_ms = delay.as_millis() as u64);
            if !sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        self.set_state(StreamState::Idle);
        log_stage!(info, "stream", "Streaming loop stopped", device_id = %device_id);
    }

    async fn read_session(
        &mut self,
        mut stream: Box<dyn TelemetryStream>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let mut consecutive_errors = 0u32;

        loop {
            let next = tokio::select! {
                result = bounded(self.config.idle_timeout, "stream_read", stream.next_chunk()) => result,
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            };

            match next {
                Ok(Some(chunk)) => {
                    self.set_state(StreamState::Streaming);
                    consecutive_errors = 0;
                    self.backoff.reset();
                    match self.ingest(&chunk).await {
                        Ok(()) => {}
                        Err(IngestError::Closed) => return SessionEnd::Shutdown,
                        Err(IngestError::Buffer(e)) => {
                            log_stage!(warn, "stream", "Could not append chunk to buffer",
                                device_id = %self.ctx.device_id(), error = %e);
                        }
                    }
                }
                Ok(None) => {
                    log_stage!(info, "stream", "Telemetry stream ended", device_id = %self.ctx.device_id());
                    return SessionEnd::Reconnect;
                }
                Err(e) => {
                    consecutive_errors += 1;
                    STREAM_READ_ERRORS.inc();
                    log_stage!(warn, "stream", "Telemetry read error",
                        device_id = %self.ctx.device_id(),
                        consecutive = consecutive_errors,
                        error = %e);
                    if consecutive_errors >= self.config.max_consecutive_errors {
                        return SessionEnd::Reconnect;
                    }
                    let delay = self.backoff.next_delay();
                    if !sleep_or_shutdown(delay, shutdown).await {
                        return SessionEnd::Shutdown;
                    }
                }
            }
        }
    }

    /// Append one chunk and run the seal check under the buffer lock.
    async fn ingest(&self, chunk: &[u8]) -> Result<(), IngestError> {
        let mut buffers = self.ctx.lock_buffers().await;
        match buffers.append_telemetry(chunk) {
            Ok(()) => {}
            Err(BufferError::Closed) => return Err(IngestError::Closed),
            Err(e) => return Err(IngestError::Buffer(e)),
        }
        STREAM_BYTES.inc_by(chunk.len() as f64);

        // Seal failures are logged by the sealer and retried on the next chunk.
        if let Err(SealError::Buffer(e)) = self.sealer.seal_if_needed(&mut buffers).await {
            return Err(IngestError::Buffer(e));
        }
        Ok(())
    }
}

enum IngestError {
    Closed,
    Buffer(BufferError),
}
