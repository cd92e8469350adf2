//! LogPipeline reconciliation
//!
//! Admits pipelines through a ConfigMap lock, validates them, projects the
//! secrets they reference, renders their Fluent Bit sections and converges
//! the shared Fluent Bit agent. Status conditions are derived from the
//! validation outcome and from two probers: agent readiness and flow health.

#![deny(missing_docs)]

pub mod agent;
pub mod client;
pub mod cluster_name;
pub mod config;
pub mod controller;
pub mod lock;
pub mod overrides;
pub mod probe;
pub mod resources;
pub mod secrets;
pub mod status;
pub mod validation;

pub use client::{LogPipelineKubeClient, LogPipelineKubeClientImpl};
pub use config::{AgentNames, ReconcilerConfig};
pub use controller::{error_policy, reconcile, Context};
pub use lock::{LockError, PipelineLock};
