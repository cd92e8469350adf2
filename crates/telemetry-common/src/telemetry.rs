//! Logging initialization for the operator process
//!
//! Sets up a `tracing` subscriber with an `EnvFilter` and either JSON
//! (default, for log shipping) or human-readable output.

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,telemetry=debug,kube=info,tower=warn,hyper=warn";

/// Errors that can occur during logging initialization
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Failed to initialize tracing subscriber
    #[error("failed to initialize tracing subscriber: {0}")]
    SubscriberInit(String),
}

/// Output format of log lines
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable text
    Text,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "console" => Ok(Self::Text),
            other => Err(format!("unknown log format '{}', expected json or text", other)),
        }
    }
}

/// Configuration for logging initialization
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name recorded in the startup line
    pub service_name: String,
    /// Output format
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "telemetry-operator".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Initialize logging with the given configuration
///
/// `RUST_LOG` overrides [`DEFAULT_LOG_FILTER`].
pub fn init_telemetry(config: TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_target(true)
                    .with_file(false)
                    .with_line_number(false),
            )
            .try_init(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
    };
    result.map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;

    let pod = pod_attributes();
    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        pod = ?pod,
        "logging initialized"
    );
    Ok(())
}

/// Kubernetes attributes exposed through the downward API
fn pod_attributes() -> Vec<(&'static str, String)> {
    [
        ("k8s.pod.name", "POD_NAME"),
        ("k8s.namespace.name", "POD_NAMESPACE"),
        ("k8s.node.name", "NODE_NAME"),
    ]
    .into_iter()
    .filter_map(|(attr, var)| std::env::var(var).ok().map(|v| (attr, v)))
    .collect()
}
