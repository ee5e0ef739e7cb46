//! HTTP client for the platform API.
//!
//! One client serves the ledger, billing, notification and session ports.
//! Every request carries the recipient's credentials as query parameters.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::domain::{
    ContentId, DeviceId, DeviceMeta, ProjectTerms, Recipient, ServiceError, Session, TxId,
};
use crate::ports::{BillingService, LedgerService, Notifier, PlatformSession};

/// Connection settings for [`PlatformClient`].
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    pub base_url: String,
    pub username: String,
    pub pwhash: String,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

/// `{"Code": 200, "Status": "OK"}` acknowledgement.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    #[serde(rename = "Code")]
    code: u16,
    #[serde(rename = "Status", default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct WalletWire {
    #[serde(rename = "PublicKey")]
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct UserWire {
    #[serde(rename = "Username")]
    username: String,
    #[serde(rename = "StellarWallet")]
    wallet: WalletWire,
}

#[derive(Debug, Deserialize)]
struct RecipientWire {
    #[serde(rename = "U")]
    user: UserWire,
    #[serde(rename = "ReceivedSolarProjectIndices", default)]
    project_indices: Vec<u32>,
}

#[derive(Debug, Deserialize)]
struct ProjectWire {
    #[serde(rename = "Index")]
    index: u32,
    #[serde(rename = "DebtAssetCode", default)]
    debt_asset_code: String,
    #[serde(rename = "PaybackPeriod", default)]
    payback_period: u32,
}

pub struct PlatformClient {
    client: Client,
    config: PlatformConfig,
    project_index: RwLock<Option<u32>>,
}

impl PlatformClient {
    pub fn new(config: PlatformConfig) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            config,
            project_index: RwLock::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn project_index(&self) -> Result<u32, ServiceError> {
        (*self.project_index.read()).ok_or(ServiceError::NoSession)
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, ServiceError> {
        let response = self
            .client
            .get(self.url(path))
            .query(&[
                ("username", self.config.username.as_str()),
                ("pwhash", self.config.pwhash.as_str()),
            ])
            .query(query)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    ServiceError::Transport(format!("cannot connect to {}", self.config.base_url))
                } else {
                    ServiceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<R, ServiceError> {
        self.get(path, query)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))
    }

    /// Call an endpoint that answers with a [`StatusResponse`].
    async fn get_status(&self, path: &str, query: &[(&str, String)]) -> Result<(), ServiceError> {
        let status: StatusResponse = self.get_json(path, query).await?;
        if status.code != 200 {
            return Err(ServiceError::Rejected {
                status: status.code,
                body: status.status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformSession for PlatformClient {
    async fn login(&self) -> Result<Session, ServiceError> {
        let recipient: RecipientWire = self.get_json("/recipient/validate", &[]).await?;
        let index = recipient
            .project_indices
            .first()
            .copied()
            .ok_or_else(|| ServiceError::Decode("recipient has no project".to_string()))?;
        let project: ProjectWire = self
            .get_json("/project/get", &[("index", index.to_string())])
            .await?;

        *self.project_index.write() = Some(project.index);
        Ok(Session {
            recipient: Recipient {
                username: recipient.user.username,
                public_key: recipient.user.wallet.public_key,
            },
            project: ProjectTerms {
                index: project.index,
                debt_asset_code: project.debt_asset_code,
                payback_period_weeks: project.payback_period,
            },
        })
    }

    async fn register_device(&self, device_id: &DeviceId) -> Result<(), ServiceError> {
        self.get_status("/recipient/deviceId", &[("deviceid", device_id.to_string())])
            .await
    }

    async fn report_energy(&self, value: u64) -> Result<(), ServiceError> {
        self.get_status("/recipient/energy", &[("energy", value.to_string())])
            .await
    }

    async fn store_state_history(&self, content_id: &ContentId) -> Result<(), ServiceError> {
        self.get_status("/recipient/ssh", &[("hash", content_id.to_string())])
            .await
    }
}

#[async_trait]
impl LedgerService for PlatformClient {
    async fn submit(&self, destination: &str, amount: u64, memo: &str) -> Result<TxId, ServiceError> {
        let hash: String = self
            .get_json(
                "/user/sendxlm",
                &[
                    ("destination", destination.to_string()),
                    ("amount", amount.to_string()),
                    ("memo", memo.to_string()),
                ],
            )
            .await?;
        Ok(TxId::new(hash))
    }

    async fn latest_block_hash(&self) -> Result<String, ServiceError> {
        self.get_json("/user/latestblockhash", &[]).await
    }
}

#[async_trait]
impl BillingService for PlatformClient {
    async fn submit_payback(&self, asset_code: &str, amount: u64) -> Result<(), ServiceError> {
        let index = self.project_index()?;
        self.get_status(
            "/recipient/payback",
            &[
                ("assetName", asset_code.to_string()),
                ("amount", amount.to_string()),
                ("projIndex", index.to_string()),
            ],
        )
        .await
    }
}

#[async_trait]
impl Notifier for PlatformClient {
    async fn notify_shutdown(&self, meta: &DeviceMeta, tx1: &TxId, tx2: &TxId) -> Result<(), ServiceError> {
        self.get_status(
            "/tellershutdown",
            &[
                ("projIndex", meta.project_index.to_string()),
                ("deviceId", meta.device_id.to_string()),
                ("tx1", tx1.to_string()),
                ("tx2", tx2.to_string()),
            ],
        )
        .await
    }

    async fn notify_payback_failed(&self, meta: &DeviceMeta) -> Result<(), ServiceError> {
        self.get_status(
            "/tellerpayback",
            &[
                ("deviceId", meta.device_id.to_string()),
                ("projIndex", meta.project_index.to_string()),
            ],
        )
        .await
    }
}
