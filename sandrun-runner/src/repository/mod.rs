//! Repository layer
//!
//! Repositories are thin adapters over the two shared collaborators of the
//! engine: the artifact store and the cluster control plane. They carry no
//! business logic.
//!
//! All repositories are trait-based so runners can be exercised against
//! in-memory fakes.

mod artifacts;
mod cluster;

// Re-export traits
pub use artifacts::ArtifactStore;
pub use cluster::{ClusterApi, PodEvents};

// Re-export implementations
pub use artifacts::{FsArtifactStore, HttpArtifactStore};
pub use cluster::HttpClusterApi;
