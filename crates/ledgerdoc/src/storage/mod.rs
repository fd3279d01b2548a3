//! Blob-like artifact storage.
//!
//! Used only to persist final JSON artifacts and optionally original files.
//! Upload failures are recorded by callers as non-fatal pipeline errors, not
//! raised as exceptions.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::BlobConfig;
use crate::error::StorageError;

/// `upload(bytes, name, tenant) -> location`.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn upload(&self, bytes: &[u8], name: &str, tenant: &str)
        -> Result<String, StorageError>;
}

/// Filesystem-backed store. Artifacts land under `{root}/{tenant}/{name}`
/// and the returned location is the absolute path.
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn upload(
        &self,
        bytes: &[u8],
        name: &str,
        tenant: &str,
    ) -> Result<String, StorageError> {
        let target = self.root.join(tenant).join(name);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
        }

        tokio::fs::write(&target, bytes)
            .await
            .map_err(|e| StorageError::WriteFile {
                path: target.clone(),
                source: e,
            })?;

        Ok(target.display().to_string())
    }
}

/// HTTP blob store: PUT bytes to `{endpoint}/{container}/{tenant}/{name}`
/// with an optional bearer token. The returned location is the blob URL.
pub struct HttpBlobStore {
    endpoint: String,
    container: String,
    token: Option<SecretString>,
    client: reqwest::Client,
}

impl HttpBlobStore {
    pub fn new(config: BlobConfig) -> Self {
        Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            container: config.container,
            token: config.token,
            client: reqwest::Client::new(),
        }
    }

    fn blob_url(&self, tenant: &str, name: &str) -> String {
        format!("{}/{}/{}/{}", self.endpoint, self.container, tenant, name)
    }
}

#[async_trait]
impl ArtifactStore for HttpBlobStore {
    async fn upload(
        &self,
        bytes: &[u8],
        name: &str,
        tenant: &str,
    ) -> Result<String, StorageError> {
        let url = self.blob_url(tenant, name);

        let mut request = self.client.put(&url).body(bytes.to_vec());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| StorageError::Upload {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        if !response.status().is_success() {
            return Err(StorageError::Upload {
                name: name.to_string(),
                reason: format!("unexpected status {}", response.status()),
            });
        }

        Ok(url)
    }
}
