//! Sandrun HTTP Clients
//!
//! Type-safe HTTP clients for the two shared collaborators of the sandbox
//! engine:
//!
//! - [`ArtifactClient`]: a blob store addressed by bucket and key
//! - [`ClusterClient`]: the cluster control plane (pod create, watch, logs, delete)
//!
//! Both clients are cheap to clone and safe to share between concurrent jobs.
//!
//! # Example
//!
//! ```no_run
//! use sandrun_client::ArtifactClient;
//!
//! #[tokio::main]
//! async fn main() -> sandrun_client::Result<()> {
//!     let store = ArtifactClient::new("http://localhost:9000", "sandrun");
//!     let uri = store
//!         .put(None, "tenant/run/execution.log", b"ok".to_vec(), "text/plain")
//!         .await?;
//!     println!("Uploaded: {}", uri);
//!     Ok(())
//! }
//! ```

mod artifacts;
mod cluster;
pub mod error;
pub mod pod;

pub use artifacts::ArtifactClient;
pub use cluster::{ClusterClient, PodWatch};
pub use error::{ClientError, Result};

/// Checks the status code and turns failures into [`ClientError`]
///
/// 404 becomes [`ClientError::NotFound`] carrying `what`.
async fn check_response(response: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = response.status();

    if status.is_success() {
        return Ok(response);
    }

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(ClientError::NotFound(what.to_string()));
    }

    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    Err(ClientError::api_error(status.as_u16(), error_text))
}
