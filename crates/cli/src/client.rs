//! API client for communicating with a running scheduler service

use anyhow::{Context, Result};
use reqwest::Client;
use scheduler_lib::{
    engine::EngineStatus, estimator::TaskSpecificEstimations, HealthResponse, NodeLabels,
    TaskLabels,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// API client for the scheduler service
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
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("API error ({}): {}", status, body);
        }

        response.json().await.context("Failed to parse response")
    }

    pub async fn labels(&self) -> Result<LabelsResponse> {
        self.get("v1/labels").await
    }

    pub async fn estimations(&self) -> Result<TaskSpecificEstimations> {
        self.get("v1/estimations").await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.get("v1/status").await
    }

    /// Health is read whatever the status code, an unhealthy service answers 503
    pub async fn health(&self) -> Result<HealthResponse> {
        let url = self.base_url.join("healthz").context("Invalid path")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;
        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelsResponse {
    pub node_labels: Option<NodeLabels>,
    pub task_labels: Option<TaskLabels>,
}
