//! Text-recognition capability.
//!
//! The network implementation submits raw bytes for asynchronous analysis and
//! polls a status endpoint until the operation settles. Absence of a
//! configured recognizer is a supported state handled by the extractor's
//! fallback path.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use thiserror::Error;

use crate::config::RecognizerConfig;

/// Poll cadence for pending analyses.
const POLL_INTERVAL: Duration = Duration::from_millis(1500);
/// Attempt ceiling; with the interval above this bounds a pending analysis
/// to roughly 45 seconds.
const MAX_POLL_ATTEMPTS: u32 = 30;

#[derive(Debug, Error)]
pub enum RecognizerError {
    #[error("analyze request failed: {0}")]
    Submit(String),

    #[error("analyze response did not include an operation location")]
    MissingOperationLocation,

    #[error("poll request failed: {0}")]
    Poll(String),

    #[error("analysis failed")]
    AnalysisFailed,

    #[error("polling gave up after {0} attempts")]
    PollTimeout(u32),

    #[error("transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Recognized text plus optional page structure.
#[derive(Debug, Clone)]
pub struct Recognition {
    pub text: String,
    pub pages: Option<Value>,
}

#[async_trait]
pub trait TextRecognizer: Send + Sync {
    async fn recognize(&self, bytes: &[u8], mime_type: &str)
        -> Result<Recognition, RecognizerError>;
}

/// HTTP recognizer: POST bytes to the analyze endpoint, then poll the
/// returned operation location until `succeeded` or `failed`.
pub struct HttpTextRecognizer {
    endpoint: String,
    api_key: SecretString,
    api_version: String,
    client: reqwest::Client,
    poll_interval: Duration,
    max_attempts: u32,
}

impl HttpTextRecognizer {
    pub fn new(config: RecognizerConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            api_version: config.api_version,
            client: reqwest::Client::new(),
            poll_interval: POLL_INTERVAL,
            max_attempts: MAX_POLL_ATTEMPTS,
        }
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/documentintelligence/documentModels/prebuilt-read:analyze?api-version={}",
            self.endpoint, self.api_version
        )
    }
}

#[async_trait]
impl TextRecognizer for HttpTextRecognizer {
    async fn recognize(
        &self,
        bytes: &[u8],
        mime_type: &str,
    ) -> Result<Recognition, RecognizerError> {
        let response = self
            .client
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
            .header("Content-Type", mime_type)
            .body(bytes.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RecognizerError::Submit(detail));
        }

        let operation_location = response
            .headers()
            .get("operation-location")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(RecognizerError::MissingOperationLocation)?;

        for attempt in 0..self.max_attempts {
            tokio::time::sleep(self.poll_interval).await;

            let poll = self
                .client
                .get(&operation_location)
                .header("Ocp-Apim-Subscription-Key", self.api_key.expose_secret())
                .send()
                .await?;

            if !poll.status().is_success() {
                let detail = poll.text().await.unwrap_or_default();
                return Err(RecognizerError::Poll(detail));
            }

            let payload: Value = poll.json().await?;
            match payload["status"].as_str() {
                Some("succeeded") => {
                    let result = &payload["analyzeResult"];
                    return Ok(Recognition {
                        text: result["content"].as_str().unwrap_or_default().to_string(),
                        pages: result.get("pages").filter(|p| !p.is_null()).cloned(),
                    });
                }
                Some("failed") => return Err(RecognizerError::AnalysisFailed),
                other => debug!("analysis still pending (attempt {}): {:?}", attempt, other),
            }
        }

        Err(RecognizerError::PollTimeout(self.max_attempts))
    }
}

/// Deterministic recognizer returning a fixed result. Used in tests and as
/// the offline stand-in for the network implementation.
pub struct StaticTextRecognizer {
    text: String,
    pages: Option<Value>,
}

impl StaticTextRecognizer {
    pub fn new(text: impl Into<String>, pages: Option<Value>) -> Self {
        Self {
            text: text.into(),
            pages,
        }
    }
}

#[async_trait]
impl TextRecognizer for StaticTextRecognizer {
    async fn recognize(
        &self,
        _bytes: &[u8],
        _mime_type: &str,
    ) -> Result<Recognition, RecognizerError> {
        Ok(Recognition {
            text: self.text.clone(),
            pages: self.pages.clone(),
        })
    }
}
