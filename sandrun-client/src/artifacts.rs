//! Blob store client
//!
//! Objects are addressed as `<base_url>/<bucket>/<key>`: `PUT` stores the
//! request body, `GET` returns it. Stored objects are reported back as
//! `s3://<bucket>/<key>` URIs.

use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use tracing::debug;

use crate::check_response;
use crate::error::{ClientError, Result};

/// HTTP client for the artifact store
#[derive(Debug, Clone)]
pub struct ArtifactClient {
    /// Base URL of the store (e.g., "http://localhost:9000")
    base_url: String,
    /// Bucket used when a caller passes none
    bucket: String,
    /// Optional bearer token
    token: Option<String>,
    client: Client,
}

impl ArtifactClient {
    /// Create a new artifact client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the store
    /// * `bucket` - Default bucket for uploads and bare keys
    pub fn new(base_url: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self::with_client(base_url, bucket, Client::new())
    }

    /// Create a new artifact client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        bucket: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            bucket: bucket.into(),
            token: None,
            client,
        }
    }

    /// Authenticate every request with a bearer token
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// URI reported for a stored object
    pub fn uri_for(&self, bucket: Option<&str>, key: &str) -> String {
        format!("s3://{}/{}", bucket.unwrap_or(&self.bucket), key)
    }

    fn object_url(&self, bucket: Option<&str>, key: &str) -> Result<String> {
        let key = key.trim_start_matches('/');
        if key.is_empty() {
            return Err(ClientError::InvalidRequest("empty object key".to_string()));
        }
        Ok(format!(
            "{}/{}/{}",
            self.base_url,
            bucket.unwrap_or(&self.bucket),
            key
        ))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Store an object
    ///
    /// # Returns
    /// The object's `s3://` URI
    pub async fn put(
        &self,
        bucket: Option<&str>,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let url = self.object_url(bucket, key)?;
        debug!("Uploading {} bytes to {}", data.len(), url);

        let request = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, content_type)
            .body(data);
        let response = self.authorize(request).send().await?;
        check_response(response, key).await?;

        Ok(self.uri_for(bucket, key))
    }

    /// Fetch an object
    pub async fn get(&self, bucket: Option<&str>, key: &str) -> Result<Vec<u8>> {
        let url = self.object_url(bucket, key)?;
        debug!("Downloading {}", url);

        let response = self.authorize(self.client.get(&url)).send().await?;
        let response = check_response(response, key).await?;

        Ok(response.bytes().await?.to_vec())
    }
}
