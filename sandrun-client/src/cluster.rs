//! Cluster control-plane client

use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, warn};

use crate::check_response;
use crate::error::{ClientError, Result};
use crate::pod::{Pod, WatchEvent};

/// HTTP client for pod operations in one namespace
#[derive(Debug, Clone)]
pub struct ClusterClient {
    api_url: String,
    namespace: String,
    token: Option<String>,
    client: Client,
}

impl ClusterClient {
    /// Create a new cluster client
    ///
    /// # Arguments
    /// * `api_url` - Base URL of the control plane API
    /// * `namespace` - Namespace every pod is created in
    pub fn new(api_url: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::with_client(api_url, namespace, Client::new())
    }

    /// Create a new cluster client with a custom HTTP client
    pub fn with_client(
        api_url: impl Into<String>,
        namespace: impl Into<String>,
        client: Client,
    ) -> Self {
        let api_url = api_url.into();
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            namespace: namespace.into(),
            token: None,
            client,
        }
    }

    /// Authenticate every request with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn pods_url(&self) -> String {
        format!("{}/api/v1/namespaces/{}/pods", self.api_url, self.namespace)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    // =============================================================================
    // Pod Lifecycle
    // =============================================================================

    /// Create a pod
    ///
    /// # Returns
    /// The pod as accepted by the control plane
    pub async fn create_pod(&self, pod: &Pod) -> Result<Pod> {
        let url = self.pods_url();
        debug!("Creating pod {} in {}", pod.metadata.name, self.namespace);

        let response = self.authorize(self.client.post(&url).json(pod)).send().await?;
        let response = check_response(response, &pod.metadata.name).await?;

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }

    /// Delete a pod
    ///
    /// # Returns
    /// `false` when the pod was already gone
    pub async fn delete_pod(&self, name: &str) -> Result<bool> {
        let url = format!("{}/{}", self.pods_url(), name);
        debug!("Deleting pod {}", name);

        let response = self.authorize(self.client.delete(&url)).send().await?;
        match check_response(response, name).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // =============================================================================
    // Observation
    // =============================================================================

    /// Open a watch stream scoped to a single pod
    pub async fn watch_pod(&self, name: &str) -> Result<PodWatch> {
        let url = format!(
            "{}?watch=true&fieldSelector=metadata.name%3D{}",
            self.pods_url(),
            name
        );
        debug!("Watching pod {}", name);

        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = check_response(response, name).await?;

        Ok(PodWatch::new(response))
    }

    /// Fetch the full log of one container
    pub async fn pod_logs(&self, name: &str, container: &str) -> Result<String> {
        let url = format!("{}/{}/log?container={}", self.pods_url(), name, container);

        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = check_response(response, name).await?;

        Ok(response.text().await?)
    }
}

/// Newline-delimited stream of watch events
#[derive(Debug)]
pub struct PodWatch {
    response: reqwest::Response,
    buffer: Vec<u8>,
    finished: bool,
}

impl PodWatch {
    fn new(response: reqwest::Response) -> Self {
        Self {
            response,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Next event, or `None` once the server closes the stream
    ///
    /// Lines that fail to decode are skipped.
    pub async fn next_event(&mut self) -> Result<Option<WatchEvent>> {
        loop {
            if let Some(line) = self.take_line() {
                if line.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<WatchEvent>(&line) {
                    Ok(event) => return Ok(Some(event)),
                    Err(e) => {
                        warn!("Skipping undecodable watch line: {}", e);
                        continue;
                    }
                }
            }

            if self.finished {
                return Ok(None);
            }

            match self.response.chunk().await? {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => {
                    self.finished = true;
                    // A final line without a trailing newline still counts
                    if !self.buffer.is_empty() {
                        self.buffer.push(b'\n');
                    }
                }
            }
        }
    }

    fn take_line(&mut self) -> Option<Vec<u8>> {
        let pos = self.buffer.iter().position(|b| *b == b'\n')?;
        let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
        line.pop();
        Some(line)
    }
}
