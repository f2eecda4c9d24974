//! Sandbox façade
//!
//! One trait, two implementations. The engine binds exactly one of them at
//! startup from the configured mode; callers never know which.

use async_trait::async_trait;
use sandrun_client::{ArtifactClient, ClusterClient};
use sandrun_core::domain::request::ExecutionRequest;
use sandrun_core::domain::result::ExecutionResult;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cluster::ClusterSandbox;
use crate::config::{Config, SandboxMode, StorageConfig};
use crate::error::SandboxError;
use crate::local::LocalSandbox;
use crate::repository::{ArtifactStore, FsArtifactStore, HttpArtifactStore, HttpClusterApi};

/// Runs test bundles in isolation
#[async_trait]
pub trait SandboxManager: Send + Sync {
    /// Runs one job to a terminal status
    ///
    /// Test failures, timeouts and infrastructure problems are reported
    /// through the returned result. `Err` is reserved for requests that can
    /// never run.
    ///
    /// # Arguments
    /// * `request` - The job
    /// * `cancel` - Caller's cancellation token; firing it ends the job with
    ///   status `Error`
    async fn run_tests(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> Result<ExecutionResult, SandboxError>;

    /// Releases everything a job left behind
    ///
    /// Idempotent: unknown or already-cleaned run ids succeed.
    async fn cleanup(&self, run_id: &str) -> Result<(), SandboxError>;

    fn mode(&self) -> SandboxMode;
}

/// Builds the artifact store described by the configuration
pub fn build_store(config: &Config) -> Option<Arc<dyn ArtifactStore>> {
    let store: Arc<dyn ArtifactStore> = match config.storage.as_ref()? {
        StorageConfig::Http { url, bucket, token } => {
            let mut client = ArtifactClient::new(url.clone(), bucket.clone());
            if let Some(token) = token {
                client = client.with_token(token.clone());
            }
            Arc::new(HttpArtifactStore::new(client))
        }
        StorageConfig::Filesystem { root, bucket } => {
            Arc::new(FsArtifactStore::new(root.clone(), bucket.clone()))
        }
    };
    Some(store)
}

/// Validates the configuration and binds the sandbox for its mode
pub fn build_manager(config: &Config) -> Result<Arc<dyn SandboxManager>, SandboxError> {
    config
        .validate()
        .map_err(|e| SandboxError::Config(format!("{:#}", e)))?;

    let store = build_store(config);

    let manager: Arc<dyn SandboxManager> = match config.mode {
        SandboxMode::Local => Arc::new(LocalSandbox::new(config, store)),
        SandboxMode::Cluster => {
            let store = store.ok_or_else(|| {
                SandboxError::Config("cluster mode requires an artifact store".to_string())
            })?;
            let mut client = ClusterClient::new(
                config.cluster.api_url.clone(),
                config.cluster.namespace.clone(),
            );
            if let Some(token) = &config.cluster.token {
                client = client.with_token(token.clone());
            }
            Arc::new(ClusterSandbox::new(
                config,
                Arc::new(HttpClusterApi::new(client)),
                store,
            ))
        }
    };

    info!("Sandbox manager bound in {} mode", config.mode);
    Ok(manager)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_manager_by_mode() {
        let manager = build_manager(&Config::default()).unwrap();
        assert_eq!(manager.mode(), SandboxMode::Local);

        let config = Config::new(SandboxMode::Cluster).with_storage(StorageConfig::Http {
            url: "http://store:9000".into(),
            bucket: "sandrun".into(),
            token: None,
        });
        let manager = build_manager(&config).unwrap();
        assert_eq!(manager.mode(), SandboxMode::Cluster);
    }

    #[test]
    fn test_build_manager_rejects_bad_config() {
        let config = Config::new(SandboxMode::Cluster);
        assert!(matches!(build_manager(&config), Err(SandboxError::Config(_))));
    }
}
