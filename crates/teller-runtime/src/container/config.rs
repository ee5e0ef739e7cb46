//! # Teller Configuration
//!
//! Runtime parameters, loaded from `TELLER_*` environment variables.
//!
//! ## Required
//!
//! `TELLER_PLATFORM_URL`, `TELLER_USERNAME` and `TELLER_PWHASH` have no
//! defaults. Everything else falls back to [`Default`].

use std::path::PathBuf;
use std::time::Duration;

use teller_core::domain::MEMO_CAPACITY;
use teller_core::service::StreamingConfig;

/// Default Particle event stream.
pub const DEFAULT_STREAM_URL: &str = "https://api.particle.io/v1/devices/events";

/// Complete agent configuration.
#[derive(Debug, Clone, Default)]
pub struct TellerConfig {
    pub storage: StorageConfig,
    pub schedule: ScheduleConfig,
    pub ledger: LedgerConfig,
    pub endpoints: EndpointConfig,
    pub device: DeviceConfig,
    pub streaming: StreamingConfig,
}

/// Home directory and buffer limits.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub home: PathBuf,
    /// Chain buffer payload size that triggers a seal, in bytes.
    pub max_local_storage: u64,
    /// Energy buffer location; `<home>/energy.txt` when unset.
    pub energy_file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".teller");
        Self {
            home,
            max_local_storage: 2000,
            energy_file: None,
        }
    }
}

/// Timers and bounds.
#[derive(Debug, Clone)]
pub struct ScheduleConfig {
    /// Session refresh interval.
    pub poll_interval: Duration,
    pub state_update_interval: Duration,
    /// Overrides the project's payback period.
    pub payback_period: Option<Duration>,
    pub call_timeout: Duration,
    /// Bound on the whole shutdown, task joins and commitment together.
    pub shutdown_grace: Duration,
    pub login_attempts: u32,
    pub login_retry_delay: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            state_update_interval: Duration::from_secs(300),
            payback_period: None,
            call_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(60),
            login_attempts: 3,
            login_retry_delay: Duration::from_secs(5),
        }
    }
}

/// Ledger commitment and payback parameters.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub memo_capacity: usize,
    pub commit_spacing: Duration,
    pub unit_price: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            memo_capacity: MEMO_CAPACITY,
            commit_spacing: Duration::from_secs(2),
            unit_price: 1.0,
        }
    }
}

/// External service locations and credentials.
#[derive(Debug, Clone)]
pub struct EndpointConfig {
    pub stream_url: String,
    pub platform_url: String,
    pub username: String,
    pub pwhash: String,
    pub ipfs_api: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            stream_url: DEFAULT_STREAM_URL.to_string(),
            platform_url: String::new(),
            username: String::new(),
            pwhash: String::new(),
            ipfs_api: "http://127.0.0.1:5001".to_string(),
        }
    }
}

/// Free-text device description carried on notifications.
#[derive(Debug, Clone, Default)]
pub struct DeviceConfig {
    pub info: String,
    pub location: String,
}

/// Configuration errors.
#[derive(Debug, PartialEq)]
pub enum ConfigError {
    /// A required variable is unset or empty.
    Missing(&'static str),
    /// A variable could not be parsed.
    Invalid { var: &'static str, value: String },
    /// A value parsed but is out of range.
    OutOfRange { var: &'static str, reason: &'static str },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(var) => write!(f, "{} must be set", var),
            ConfigError::Invalid { var, value } => {
                write!(f, "{} has an invalid value: {:?}", var, value)
            }
            ConfigError::OutOfRange { var, reason } => write!(f, "{} {}", var, reason),
        }
    }
}

impl std::error::Error for ConfigError {}

impl TellerConfig {
    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary variable source and validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self::default();

        if let Some(home) = get("TELLER_HOME") {
            config.storage.home = PathBuf::from(home);
        }
        if let Some(v) = get("TELLER_MAX_LOCAL_STORAGE") {
            config.storage.max_local_storage = parse("TELLER_MAX_LOCAL_STORAGE", &v)?;
        }
        config.storage.energy_file = get("TELLER_ENERGY_FILE").map(PathBuf::from);

        if let Some(v) = get("TELLER_POLL_INTERVAL_SECS") {
            config.schedule.poll_interval = secs("TELLER_POLL_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("TELLER_STATE_UPDATE_INTERVAL_SECS") {
            config.schedule.state_update_interval = secs("TELLER_STATE_UPDATE_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = get("TELLER_PAYBACK_PERIOD_SECS") {
            config.schedule.payback_period = Some(secs("TELLER_PAYBACK_PERIOD_SECS", &v)?);
        }
        if let Some(v) = get("TELLER_CALL_TIMEOUT_SECS") {
            config.schedule.call_timeout = secs("TELLER_CALL_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("TELLER_SHUTDOWN_GRACE_SECS") {
            config.schedule.shutdown_grace = secs("TELLER_SHUTDOWN_GRACE_SECS", &v)?;
        }

        if let Some(v) = get("TELLER_MEMO_CAPACITY") {
            config.ledger.memo_capacity = parse("TELLER_MEMO_CAPACITY", &v)?;
        }
        if let Some(v) = get("TELLER_COMMIT_SPACING_SECS") {
            config.ledger.commit_spacing = secs("TELLER_COMMIT_SPACING_SECS", &v)?;
        }
        if let Some(v) = get("TELLER_UNIT_PRICE") {
            config.ledger.unit_price = parse("TELLER_UNIT_PRICE", &v)?;
        }

        if let Some(v) = get("TELLER_STREAM_URL") {
            config.endpoints.stream_url = v;
        }
        if let Some(v) = get("TELLER_IPFS_API") {
            config.endpoints.ipfs_api = v;
        }
        config.endpoints.platform_url =
            get("TELLER_PLATFORM_URL").ok_or(ConfigError::Missing("TELLER_PLATFORM_URL"))?;
        config.endpoints.username =
            get("TELLER_USERNAME").ok_or(ConfigError::Missing("TELLER_USERNAME"))?;
        config.endpoints.pwhash = get("TELLER_PWHASH").ok_or(ConfigError::Missing("TELLER_PWHASH"))?;

        config.device.info = get("TELLER_DEVICE_INFO").unwrap_or_default();
        config.device.location = get("TELLER_DEVICE_LOCATION").unwrap_or_default();

        config.validate()?;
        Ok(config)
    }

    /// Reject values the agent cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.max_local_storage == 0 {
            return Err(ConfigError::OutOfRange {
                var: "TELLER_MAX_LOCAL_STORAGE",
                reason: "must be greater than zero",
            });
        }
        if self.ledger.memo_capacity == 0 {
            return Err(ConfigError::OutOfRange {
                var: "TELLER_MEMO_CAPACITY",
                reason: "must be greater than zero",
            });
        }
        if !self.ledger.unit_price.is_finite() || self.ledger.unit_price < 0.0 {
            return Err(ConfigError::OutOfRange {
                var: "TELLER_UNIT_PRICE",
                reason: "must be a non-negative number",
            });
        }
        if self.schedule.call_timeout.is_zero() {
            return Err(ConfigError::OutOfRange {
                var: "TELLER_CALL_TIMEOUT_SECS",
                reason: "must be greater than zero",
            });
        }
        if self.schedule.poll_interval.is_zero() || self.schedule.state_update_interval.is_zero() {
            return Err(ConfigError::OutOfRange {
                var: "TELLER_POLL_INTERVAL_SECS",
                reason: "intervals must be greater than zero",
            });
        }
        if self.schedule.payback_period.is_some_and(|p| p.is_zero()) {
            return Err(ConfigError::OutOfRange {
                var: "TELLER_PAYBACK_PERIOD_SECS",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        value: value.to_string(),
    })
}

fn secs(var: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(var, value).map(Duration::from_secs)
}
