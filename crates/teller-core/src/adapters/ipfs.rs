//! IPFS HTTP API content store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;

use crate::domain::{ContentId, ServiceError};
use crate::ports::ContentStore;

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
}

/// Stores payloads through `POST {api}/api/v0/add`.
pub struct IpfsHttpStore {
    client: Client,
    api_url: String,
}

impl IpfsHttpStore {
    pub fn new(api_url: impl Into<String>, request_timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            api_url: api_url.into(),
        })
    }

    fn add_url(&self) -> String {
        format!("{}/api/v0/add?pin=true", self.api_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ContentStore for IpfsHttpStore {
    async fn put_bytes(&self, payload: &[u8]) -> Result<ContentId, ServiceError> {
        let form = Form::new().part("file", Part::bytes(payload.to_vec()).file_name("data"));

        let response = self
            .client
            .post(self.add_url())
            .multipart(form)
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Decode(e.to_string()))?;
        if added.hash.is_empty() {
            return Err(ServiceError::Decode("empty content id".to_string()));
        }
        Ok(ContentId::new(added.hash))
    }
}
