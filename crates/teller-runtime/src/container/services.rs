//! # Agent Services
//!
//! The outbound port implementations the agent runs against. Production
//! wiring uses the HTTP adapters; tests swap in the in-memory doubles.

use std::sync::Arc;
use std::time::Duration;

use teller_core::adapters::{IpfsHttpStore, ParticleSource, PlatformClient, PlatformConfig};
use teller_core::domain::ServiceError;
use teller_core::ports::{
    BillingService, ContentStore, LedgerService, Notifier, PlatformSession, TelemetrySource,
};

use super::config::TellerConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One handle per outbound port.
#[derive(Clone)]
pub struct AgentServices {
    pub store: Arc<dyn ContentStore>,
    pub ledger: Arc<dyn LedgerService>,
    pub source: Arc<dyn TelemetrySource>,
    pub billing: Arc<dyn BillingService>,
    pub notifier: Arc<dyn Notifier>,
    pub platform: Arc<dyn PlatformSession>,
}

impl AgentServices {
    /// Wire the HTTP adapters. The platform client backs the ledger, billing,
    /// notification and session ports.
    pub fn http(config: &TellerConfig) -> Result<Self, ServiceError> {
        let timeout = config.schedule.call_timeout;
        let platform = Arc::new(PlatformClient::new(PlatformConfig {
            base_url: config.endpoints.platform_url.clone(),
            username: config.endpoints.username.clone(),
            pwhash: config.endpoints.pwhash.clone(),
            request_timeout: timeout,
            connect_timeout: CONNECT_TIMEOUT.min(timeout),
        })?);

        Ok(Self {
            store: Arc::new(IpfsHttpStore::new(config.endpoints.ipfs_api.clone(), timeout)?),
            ledger: platform.clone(),
            source: Arc::new(ParticleSource::new(
                config.endpoints.stream_url.clone(),
                CONNECT_TIMEOUT,
            )?),
            billing: platform.clone(),
            notifier: platform.clone(),
            platform,
        })
    }
}
