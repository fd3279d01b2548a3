//! Completion-style AI capability.
//!
//! The pipeline never talks to a vendor SDK directly: it depends on the
//! `CompletionBackend` trait, wired at startup to either the network-backed
//! HTTP client or nothing at all (degraded mode). The static backend exists
//! for tests and offline runs.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use thiserror::Error;

use crate::config::CompletionConfig;

#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed with status {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("completion response contained no content")]
    EmptyResponse,

    #[error("completion transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Single request/response call: system + user prompt in, JSON text out.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError>;
}

/// Network-backed completion client speaking the chat-completions wire format
/// (deployment-scoped endpoint, `api-key` header, JSON-object response mode).
pub struct HttpCompletionClient {
    endpoint: String,
    deployment: String,
    api_key: SecretString,
    api_version: String,
    client: reqwest::Client,
}

impl HttpCompletionClient {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            deployment: config.deployment,
            api_key: config.api_key,
            api_version: config.api_version,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/chat/completions?api-version={}",
            self.endpoint, self.deployment, self.api_version
        )
    }
}

#[async_trait]
impl CompletionBackend for HttpCompletionClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String, CompletionError> {
        let body = json!({
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
        });

        let response = self
            .client
            .post(self.url())
            .header("Content-Type", "application/json")
            .header("api-key", self.api_key.expose_secret())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        let payload: serde_json::Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .filter(|c| !c.is_empty())
            .ok_or(CompletionError::EmptyResponse)?;

        Ok(content.to_string())
    }
}

/// Deterministic backend returning a fixed response. Used in tests and as an
/// offline stand-in when exercising the full AI-backed code path locally.
pub struct StaticCompletionBackend {
    response: String,
}

impl StaticCompletionBackend {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl CompletionBackend for StaticCompletionBackend {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String, CompletionError> {
        Ok(self.response.clone())
    }
}
