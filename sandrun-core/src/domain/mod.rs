//! Core domain types
//!
//! These types are shared between the runners (which produce results) and
//! their callers (the CLI, the batch orchestrator, reporting and healing stages).

pub mod artifact;
pub mod batch;
pub mod outcome;
pub mod request;
pub mod resources;
pub mod result;
