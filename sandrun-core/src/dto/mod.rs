//! Data Transfer Objects
//!
//! Lightweight messages handed to caller-provided sinks while a job runs.

pub mod progress;
