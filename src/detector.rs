use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use crate::config::DetectorConfig;
use crate::models::DetectorResponse;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("request to detector failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("detector returned an unreadable body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Something that turns a base64 image into detections.
#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, image_base64: &str) -> Result<DetectorResponse, DetectorError>;
}

/// Hosted object-detection API (`POST {endpoint}/{model_id}?api_key=...`).
pub struct HostedDetector {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl HostedDetector {
    /// `None` when the model id or API key is missing.
    pub fn from_config(config: &DetectorConfig) -> Option<Self> {
        let (model_id, api_key) = config.credentials()?;
        Some(Self {
            client: reqwest::Client::new(),
            url: model_url(&config.endpoint, model_id),
            api_key: api_key.to_string(),
        })
    }
}

fn model_url(endpoint: &str, model_id: &str) -> String {
    format!(
        "{}/{}",
        endpoint.trim_end_matches('/'),
        model_id.trim_start_matches('/')
    )
}

#[async_trait]
impl Detector for HostedDetector {
    async fn detect(&self, image_base64: &str) -> Result<DetectorResponse, DetectorError> {
        debug!(url = %self.url, bytes = image_base64.len(), "forwarding image to detector");
        let response = self
            .client
            .post(&self.url)
            .query(&[("api_key", self.api_key.as_str())])
            .header(
                reqwest::header::CONTENT_TYPE,
                "application/x-www-form-urlencoded",
            )
            .body(image_base64.to_string())
            .send()
            .await?;
        let status = response.status();
        let body = response.bytes().await?;
        debug!(%status, bytes = body.len(), "detector responded");
        Ok(serde_json::from_slice(&body)?)
    }
}
