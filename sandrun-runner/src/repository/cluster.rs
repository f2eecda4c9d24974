//! Cluster repository
//!
//! Pod lifecycle operations against the control plane.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sandrun_client::pod::{Pod, WatchEvent};
use sandrun_client::{ClusterClient, PodWatch};

/// Repository trait for pod operations
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Submits a pod
    async fn create_pod(&self, pod: &Pod) -> Result<()>;

    /// Opens an event stream scoped to one pod
    async fn watch_pod(&self, name: &str) -> Result<Box<dyn PodEvents>>;

    /// Full log of one container
    async fn pod_logs(&self, name: &str, container: &str) -> Result<String>;

    /// Deletes a pod
    ///
    /// # Returns
    /// `false` when the pod did not exist
    async fn delete_pod(&self, name: &str) -> Result<bool>;
}

/// Stream of state changes for one pod
#[async_trait]
pub trait PodEvents: Send {
    /// Next event, `None` when the stream ended
    async fn next_event(&mut self) -> Result<Option<WatchEvent>>;
}

/// HTTP implementation of ClusterApi
pub struct HttpClusterApi {
    client: ClusterClient,
}

impl HttpClusterApi {
    /// Creates a new HTTP cluster repository
    ///
    /// # Arguments
    /// * `client` - Configured cluster client (API URL, namespace, token)
    pub fn new(client: ClusterClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ClusterApi for HttpClusterApi {
    async fn create_pod(&self, pod: &Pod) -> Result<()> {
        self.client
            .create_pod(pod)
            .await
            .with_context(|| format!("Failed to create pod {}", pod.metadata.name))?;
        Ok(())
    }

    async fn watch_pod(&self, name: &str) -> Result<Box<dyn PodEvents>> {
        let watch = self
            .client
            .watch_pod(name)
            .await
            .with_context(|| format!("Failed to watch pod {}", name))?;
        Ok(Box::new(watch))
    }

    async fn pod_logs(&self, name: &str, container: &str) -> Result<String> {
        self.client
            .pod_logs(name, container)
            .await
            .with_context(|| format!("Failed to fetch logs for pod {}", name))
    }

    async fn delete_pod(&self, name: &str) -> Result<bool> {
        self.client
            .delete_pod(name)
            .await
            .with_context(|| format!("Failed to delete pod {}", name))
    }
}

#[async_trait]
impl PodEvents for PodWatch {
    async fn next_event(&mut self) -> Result<Option<WatchEvent>> {
        PodWatch::next_event(self)
            .await
            .context("Pod watch stream failed")
    }
}
