//! # Agent Supervisor
//!
//! ## Startup Sequence
//!
//! 1. Acquire the home directory lock
//! 2. Load or register the device identity (fatal on failure)
//! 3. Open the chain and energy buffers, recovering the chain head
//! 4. Log in to the platform (bounded retries, fatal on failure)
//! 5. Record the ledger block hash at start
//! 6. Spawn streaming, billing, session and state-update tasks
//!
//! ## Shutdown Sequence
//!
//! 1. Signal every task to stop and wait for them
//! 2. Run the shutdown commitment
//! 3. Release the home directory lock
//!
//! Steps 1 and 2 share one grace deadline.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use teller_core::service::{
    bounded, AgentContext, AggregatorConfig, BillingAggregator, HashChainSealer, LedgerCommitter,
    SessionRefresher, ShutdownHandler, ShutdownReport, StateUpdater, StreamState, StreamingLoop,
};
use teller_core::storage::{Buffers, HomeLock, IdentityStore};
use teller_core::DeviceInfo;

use crate::container::{AgentServices, TellerConfig};

/// Builds and starts the agent.
pub struct TellerRuntime {
    config: TellerConfig,
    services: AgentServices,
}

impl TellerRuntime {
    pub fn new(config: TellerConfig, services: AgentServices) -> Self {
        Self { config, services }
    }

    pub fn config(&self) -> &TellerConfig {
        &self.config
    }

    /// Bootstrap the agent and spawn its tasks.
    pub async fn start(self) -> Result<RunningAgent> {
        let Self { config, services } = self;
        let home = config.storage.home.clone();
        let timeout = config.schedule.call_timeout;

        info!("===========================================");
        info!("  Teller v{}", teller_core::VERSION);
        info!("  Home: {}", home.display());
        info!("===========================================");

        let lock = HomeLock::acquire(&home).context("Failed to lock teller home")?;

        let device_id = IdentityStore::new(&home)
            .load_or_register(services.platform.as_ref(), timeout)
            .await
            .context("Failed to establish device identity")?;

        let buffers = Buffers::open(&home, config.storage.energy_file.as_deref())
            .context("Failed to open telemetry buffers")?;

        let ctx = Arc::new(AgentContext::new(
            device_id,
            DeviceInfo {
                info: config.device.info.clone(),
                location: config.device.location.clone(),
            },
            buffers,
            timeout,
        ));
        info!(device_id = %ctx.device_id(), chain_head = ?ctx.chain_head().map(|c| c.to_string()), "Agent context ready");

        let refresher = SessionRefresher::new(
            ctx.clone(),
            services.platform.clone(),
            config.schedule.poll_interval,
        );
        refresher
            .login_with_retry(config.schedule.login_attempts, config.schedule.login_retry_delay)
            .await
            .context("Failed to log in to the platform")?;

        match bounded(timeout, "latest_block_hash", services.ledger.latest_block_hash()).await {
            Ok(hash) => ctx.set_start_block_hash(hash),
            Err(e) => warn!(error = %e, "Could not read start block hash"),
        }

        let sealer = Arc::new(HashChainSealer::new(
            ctx.clone(),
            services.store.clone(),
            config.storage.max_local_storage,
        ));
        let committer = Arc::new(LedgerCommitter::new(
            services.ledger.clone(),
            config.ledger.memo_capacity,
            config.ledger.commit_spacing,
            timeout,
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let mut tasks = Vec::new();

        let streaming = StreamingLoop::new(
            ctx.clone(),
            services.source.clone(),
            sealer.clone(),
            config.streaming.clone(),
        );
        let stream_state = streaming.subscribe_state();
        tasks.push(("streaming", tokio::spawn(streaming.run(shutdown_rx.clone()))));

        let aggregator = BillingAggregator::new(
            ctx.clone(),
            sealer.clone(),
            services.billing.clone(),
            services.notifier.clone(),
            services.platform.clone(),
            AggregatorConfig {
                period_override: config.schedule.payback_period,
                unit_price: config.ledger.unit_price,
            },
        );
        tasks.push(("billing", tokio::spawn(aggregator.run(shutdown_rx.clone()))));

        tasks.push(("session", tokio::spawn(refresher.run(shutdown_rx.clone()))));

        let updater = StateUpdater::new(
            ctx.clone(),
            services.store.clone(),
            committer.clone(),
            config.schedule.state_update_interval,
        );
        tasks.push(("state", tokio::spawn(updater.run(shutdown_rx, trigger_rx))));

        let shutdown_handler = ShutdownHandler::new(
            ctx.clone(),
            sealer,
            services.store.clone(),
            committer,
            services.ledger.clone(),
            services.notifier.clone(),
            services.platform.clone(),
        );

        info!(device_id = %ctx.device_id(), tasks = tasks.len(), "Teller is running");

        Ok(RunningAgent {
            ctx,
            shutdown_tx,
            trigger_tx,
            tasks,
            shutdown_handler,
            stream_state,
            grace: config.schedule.shutdown_grace,
            _lock: lock,
        })
    }
}

/// A started agent. Dropping it without [`shutdown`](Self::shutdown) skips
/// the shutdown commitment.
pub struct RunningAgent {
    ctx: Arc<AgentContext>,
    shutdown_tx: watch::Sender<bool>,
    trigger_tx: mpsc::Sender<()>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_handler: ShutdownHandler,
    stream_state: watch::Receiver<StreamState>,
    grace: Duration,
    _lock: HomeLock,
}

impl RunningAgent {
    pub fn context(&self) -> &Arc<AgentContext> {
        &self.ctx
    }

    pub fn stream_state(&self) -> StreamState {
        *self.stream_state.borrow()
    }

    /// Sender that requests an immediate state update.
    pub fn state_update_trigger(&self) -> mpsc::Sender<()> {
        self.trigger_tx.clone()
    }

    /// Stop every task, then run the shutdown commitment.
    ///
    /// Task joins and the commitment share a single grace deadline. Returns
    /// `None` when the commitment did not finish before it.
    pub async fn shutdown(self) -> Option<ShutdownReport> {
        info!(device_id = %self.ctx.device_id(), "Initiating graceful shutdown");
        if self.shutdown_tx.send(true).is_err() {
            warn!("All tasks already stopped");
        }

        let deadline = tokio::time::Instant::now() + self.grace;
        for (name, mut handle) in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(task = name, error = %e, "Task ended abnormally"),
                Err(_) => {
                    warn!(task = name, "Task did not stop within grace period, aborting");
                    handle.abort();
                }
            }
        }

        match tokio::time::timeout_at(deadline, self.shutdown_handler.run()).await {
            Ok(report) => {
                if report.is_clean() {
                    info!(device_id = %self.ctx.device_id(), "Shutdown commitment complete");
                } else {
                    warn!(device_id = %self.ctx.device_id(), failures = ?report.failures,
                        "Shutdown commitment finished with failures");
                }
                Some(report)
            }
            Err(_) => {
                error!(device_id = %self.ctx.device_id(), grace_secs = self.grace.as_secs(),
                    "Shutdown commitment did not finish within grace period");
                None
            }
        }
    }
}

/// Wait for SIGINT or SIGTERM. SIGUSR1 requests a state update and keeps waiting.
#[cfg(unix)]
pub async fn wait_for_termination(trigger: mpsc::Sender<()>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut user1 = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;

    loop {
        tokio::select! {
            _ = terminate.recv() => {
                info!("Received SIGTERM");
                return Ok(());
            }
            _ = interrupt.recv() => {
                info!("Received SIGINT");
                return Ok(());
            }
            _ = user1.recv() => {
                // A full channel means an update is already queued.
                if trigger.try_send(()).is_ok() {
                    info!("Received SIGUSR1, state update requested");
                }
            }
        }
    }
}

/// Wait for Ctrl+C.
#[cfg(not(unix))]
pub async fn wait_for_termination(_trigger: mpsc::Sender<()>) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Received Ctrl+C");
    Ok(())
}
