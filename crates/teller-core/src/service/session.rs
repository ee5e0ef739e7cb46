//! Platform login and periodic session refresh.

use std::sync::Arc;
use std::time::Duration;

use teller_telemetry::log_stage;
use tokio::sync::watch;

use crate::domain::{ServiceError, Session};
use crate::ports::PlatformSession;
use crate::service::{bounded, sleep_or_shutdown, AgentContext};

pub struct SessionRefresher {
    ctx: Arc<AgentContext>,
    platform: Arc<dyn PlatformSession>,
    interval: Duration,
}

impl SessionRefresher {
    pub fn new(ctx: Arc<AgentContext>, platform: Arc<dyn PlatformSession>, interval: Duration) -> Self {
        Self {
            ctx,
            platform,
            interval,
        }
    }

    /// Log in and install the session.
    pub async fn refresh_once(&self) -> Result<Session, ServiceError> {
        let session = bounded(self.ctx.call_timeout(), "login", self.platform.login()).await?;
        self.ctx.set_session(session.clone());
        Ok(session)
    }

    /// Initial login, retried `attempts` times with `delay` between tries.
    pub async fn login_with_retry(&self, attempts: u32, delay: Duration) -> Result<Session, ServiceError> {
        let attempts = attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.refresh_once().await {
                Ok(session) => {
                    log_stage!(info, "session", "Logged in",
                        username = %session.recipient.username,
                        project_index = session.project.index);
                    return Ok(session);
                }
                Err(e) if attempt < attempts => {
                    log_stage!(warn, "session", "Login failed, retrying",
                        attempt = attempt, error = %e);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Re-login every interval until shutdown, keeping the old session on failure.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        while sleep_or_shutdown(self.interval, &mut shutdown).await {
            if let Err(e) = self.refresh_once().await {
                log_stage!(warn, "session", "Session refresh failed, keeping previous session",
                    device_id = %self.ctx.device_id(), error = %e);
            }
        }
        log_stage!(debug, "session", "Session refresher stopped");
    }
}
