//! Sandrun Core
//!
//! Core types for the Sandrun sandbox execution engine.
//!
//! This crate contains:
//! - Domain types: execution requests and results, test outcomes, tier resources,
//!   batch aggregates and the artifact key layout
//! - DTOs: progress heartbeats emitted to callers while a job is in flight

pub mod domain;
pub mod dto;
