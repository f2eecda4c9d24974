//! Artifact store repository
//!
//! Stores job logs, structured reports and media, and serves script bundles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sandrun_client::ArtifactClient;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Repository trait for blob storage
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Stores an object in the default bucket
    ///
    /// # Returns
    /// The object's URI
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String>;

    /// Fetches an object; `None` selects the default bucket
    async fn download(&self, bucket: Option<&str>, key: &str) -> Result<Vec<u8>>;

    /// URI of a key (or key prefix) in the default bucket
    fn uri_for(&self, key: &str) -> String;
}

/// HTTP implementation of ArtifactStore
pub struct HttpArtifactStore {
    client: ArtifactClient,
}

impl HttpArtifactStore {
    /// Creates a new HTTP artifact store
    ///
    /// # Arguments
    /// * `client` - Configured artifact client (base URL, bucket, token)
    pub fn new(client: ArtifactClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn upload(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<String> {
        self.client
            .put(None, key, data, content_type)
            .await
            .with_context(|| format!("Failed to upload {}", key))
    }

    async fn download(&self, bucket: Option<&str>, key: &str) -> Result<Vec<u8>> {
        self.client
            .get(bucket, key)
            .await
            .with_context(|| format!("Failed to download {}", key))
    }

    fn uri_for(&self, key: &str) -> String {
        self.client.uri_for(None, key)
    }
}

/// Filesystem implementation of ArtifactStore
///
/// Objects live at `<root>/<bucket>/<key>`.
pub struct FsArtifactStore {
    root: PathBuf,
    bucket: String,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            bucket: bucket.into(),
        }
    }

    fn object_path(&self, bucket: Option<&str>, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if key.is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)))
        {
            anyhow::bail!("invalid object key: {}", key);
        }
        Ok(self
            .root
            .join(bucket.unwrap_or(&self.bucket))
            .join(relative))
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn upload(&self, key: &str, data: Vec<u8>, _content_type: &str) -> Result<String> {
        let path = self.object_path(None, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        debug!("Writing {} bytes to {}", data.len(), path.display());
        tokio::fs::write(&path, data)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(self.uri_for(key))
    }

    async fn download(&self, bucket: Option<&str>, key: &str) -> Result<Vec<u8>> {
        let path = self.object_path(bucket, key)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))
    }

    fn uri_for(&self, key: &str) -> String {
        format!(
            "file://{}/{}/{}",
            self.root.display(),
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}
