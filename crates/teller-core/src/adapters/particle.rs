//! Particle server-sent events stream over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};

use crate::domain::ServiceError;
use crate::ports::{TelemetrySource, TelemetryStream};

/// Opens a long-lived GET against the event stream URL.
///
/// No request timeout is set on the client; the streaming loop applies its
/// own idle timeout per chunk.
pub struct ParticleSource {
    client: Client,
    url: String,
}

impl ParticleSource {
    pub fn new(url: impl Into<String>, connect_timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ServiceError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TelemetrySource for ParticleSource {
    async fn connect(&self) -> Result<Box<dyn TelemetryStream>, ServiceError> {
        let response = self
            .client
            .get(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| ServiceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ServiceError::Rejected {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(Box::new(ParticleStream { response }))
    }
}

struct ParticleStream {
    response: Response,
}

#[async_trait]
impl TelemetryStream for ParticleStream {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, ServiceError> {
        self.response
            .chunk()
            .await
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()))
            .map_err(|e| ServiceError::Transport(e.to_string()))
    }
}
