//! Sandrun Runner
//!
//! Sandbox execution engine for end-to-end browser test bundles.
//!
//! This crate contains:
//! - The sandbox façade ([`manager::SandboxManager`]) and its two runners:
//!   local subprocesses and cluster pods
//! - Result normalization from whichever source a run produced
//! - Progress heartbeats, caller-side execution and batch orchestration
//! - Configuration and the artifact store / control plane repositories

pub mod args;
pub mod batch;
pub mod cluster;
pub mod config;
pub mod error;
pub mod execution;
pub mod heartbeat;
pub mod interrupt;
pub mod local;
pub mod manager;
pub mod normalize;
pub mod repository;

#[cfg(test)]
mod testing;

pub use config::{Config, SandboxMode};
pub use error::SandboxError;
pub use manager::{SandboxManager, build_manager};
