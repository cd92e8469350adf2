//! Common types for the telemetry operator: the LogPipeline CRD, status
//! conditions, errors and logging setup.

#![deny(missing_docs)]

pub mod conditions;
pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the Fluent Bit agent and its artifacts live in unless overridden
pub const DEFAULT_TELEMETRY_NAMESPACE: &str = "kyma-system";

/// Fluent Bit HTTP admin / metrics port
pub const FLUENT_BIT_HTTP_PORT: i32 = 2020;

/// Port of the filesystem-buffer exporter sidecar
pub const FLUENT_BIT_EXPORTER_METRICS_PORT: i32 = 2021;

/// Envoy sidecar metrics port, opened in the network policy when Istio is active
pub const ISTIO_ENVOY_PORT: i32 = 15090;
