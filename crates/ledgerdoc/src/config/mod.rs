//! Environment-based configuration.
//!
//! Every external capability (text recognition, completion, blob storage) is
//! optional: absence of its variables is a valid state that selects the
//! deterministic degraded path instead of failing startup. Credentials are
//! wrapped in `SecretString` so they never land in logs or debug output.

use std::time::Duration;

use secrecy::SecretString;

/// Text-recognition service (submit-for-analysis + poll-for-result over HTTP).
#[derive(Clone)]
pub struct RecognizerConfig {
    pub endpoint: String,
    pub api_key: SecretString,
    pub api_version: String,
}

/// Completion-style AI service (single request/response JSON call).
#[derive(Clone)]
pub struct CompletionConfig {
    pub endpoint: String,
    pub deployment: String,
    pub api_key: SecretString,
    pub api_version: String,
}

/// Blob-like storage for final JSON artifacts and optionally original files.
#[derive(Clone)]
pub struct BlobConfig {
    pub endpoint: String,
    pub container: String,
    pub token: Option<SecretString>,
}

/// Tenant scope applied to every persistence payload.
#[derive(Debug, Clone)]
pub struct TenantContext {
    pub company_id: String,
    pub timezone: String,
    pub currency_default: String,
}

impl Default for TenantContext {
    fn default() -> Self {
        Self {
            company_id: "unknown-company".to_string(),
            timezone: "America/Sao_Paulo".to_string(),
            currency_default: "BRL".to_string(),
        }
    }
}

/// Job queue tuning.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub poll_interval: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            poll_interval: Duration::from_millis(5000),
        }
    }
}

#[derive(Clone, Default)]
pub struct Config {
    pub recognizer: Option<RecognizerConfig>,
    pub completion: Option<CompletionConfig>,
    pub blob: Option<BlobConfig>,
    pub tenant: TenantContext,
    pub queue: QueueSettings,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn env_var_or(name: &str, default: &str) -> String {
    env_var(name).unwrap_or_else(|| default.to_string())
}

fn env_usize_or(name: &str, default: usize) -> usize {
    match env_var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {}='{}', using {}", name, raw, default);
            default
        }),
        None => default,
    }
}

fn env_u64_or(name: &str, default: u64) -> u64 {
    match env_var(name) {
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("Ignoring invalid {}='{}', using {}", name, raw, default);
            default
        }),
        None => default,
    }
}

impl Config {
    /// Reads the full configuration from the environment.
    pub fn from_env() -> Self {
        Self {
            recognizer: RecognizerConfig::from_env(),
            completion: CompletionConfig::from_env(),
            blob: BlobConfig::from_env(),
            tenant: TenantContext::from_env(),
            queue: QueueSettings::from_env(),
        }
    }
}

impl RecognizerConfig {
    /// Present only when both endpoint and key are set.
    pub fn from_env() -> Option<Self> {
        let endpoint = env_var("LEDGERDOC_DOCINTEL_ENDPOINT")?;
        let key = env_var("LEDGERDOC_DOCINTEL_KEY")?;
        Some(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: SecretString::from(key),
            api_version: env_var_or("LEDGERDOC_DOCINTEL_API_VERSION", "2024-11-30"),
        })
    }
}

impl CompletionConfig {
    /// Present only when all four variables are set.
    pub fn from_env() -> Option<Self> {
        let endpoint = env_var("LEDGERDOC_AI_ENDPOINT")?;
        let deployment = env_var("LEDGERDOC_AI_DEPLOYMENT")?;
        let key = env_var("LEDGERDOC_AI_KEY")?;
        let api_version = env_var("LEDGERDOC_AI_API_VERSION")?;
        Some(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            deployment,
            api_key: SecretString::from(key),
            api_version,
        })
    }
}

impl BlobConfig {
    pub fn from_env() -> Option<Self> {
        let endpoint = env_var("LEDGERDOC_BLOB_ENDPOINT")?;
        let container = env_var("LEDGERDOC_BLOB_CONTAINER")?;
        Some(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            container,
            token: env_var("LEDGERDOC_BLOB_TOKEN").map(SecretString::from),
        })
    }
}

impl TenantContext {
    pub fn from_env() -> Self {
        Self {
            company_id: env_var_or("LEDGERDOC_COMPANY_ID", "unknown-company"),
            timezone: env_var_or("LEDGERDOC_TIMEZONE", "America/Sao_Paulo"),
            currency_default: env_var_or("LEDGERDOC_CURRENCY", "BRL"),
        }
    }
}

impl QueueSettings {
    pub fn from_env() -> Self {
        Self {
            max_concurrent: env_usize_or("LEDGERDOC_MAX_CONCURRENT", 5),
            poll_interval: Duration::from_millis(env_u64_or(
                "LEDGERDOC_POLL_INTERVAL_MS",
                5000,
            )),
        }
    }
}
