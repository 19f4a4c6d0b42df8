//! API client for the edge-placer daemon

use anyhow::{Context, Result};
use placer_lib::{NodeTelemetry, Placement, UtilizationSnapshot};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors reported by the daemon itself
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

/// API client for the daemon's HTTP port
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            return Err(ClientError::Api { status, message }.into());
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn snapshot(&self) -> Result<SnapshotResponse> {
        self.get("api/v1/snapshot").await
    }

    pub async fn placement(&self) -> Result<Placement> {
        self.get("api/v1/placement").await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub pass: u64,
    pub snapshot: UtilizationSnapshot,
    #[serde(default)]
    pub readings: Vec<NodeTelemetry>,
    pub last_stable: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}
