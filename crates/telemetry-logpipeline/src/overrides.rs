//! Operator overrides
//!
//! An optional ConfigMap lets operators pause LogPipeline reconciliation
//! during maintenance. Its `override-config` key holds YAML such as:
//!
//! ```yaml
//! logging:
//!   paused: true
//! ```

use serde::Deserialize;

use telemetry_common::Error;

use crate::client::LogPipelineKubeClient;
use crate::config::ReconcilerConfig;

/// Key of the overrides document inside the ConfigMap
pub const OVERRIDES_KEY: &str = "override-config";

/// Overrides document; unknown sections are ignored
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Overrides {
    /// LogPipeline settings
    #[serde(default)]
    pub logging: LoggingOverrides,
}

/// Overrides for LogPipelines
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoggingOverrides {
    /// Skip reconciliation entirely
    #[serde(default)]
    pub paused: bool,
}

/// Parse an overrides document. Blank documents mean no overrides.
pub fn parse_overrides(document: &str) -> Result<Overrides, Error> {
    if document.trim().is_empty() {
        return Ok(Overrides::default());
    }
    serde_yaml::from_str(document)
        .map_err(|e| Error::serialization(format!("invalid overrides: {e}")))
}

/// Read the overrides ConfigMap; absent ConfigMap or key means no overrides
pub async fn load_overrides(
    kube: &dyn LogPipelineKubeClient,
    config: &ReconcilerConfig,
) -> Result<Overrides, Error> {
    let document = kube
        .get_config_map(&config.namespace, &config.overrides_config_map)
        .await?
        .and_then(|cm| cm.data)
        .and_then(|mut data| data.remove(OVERRIDES_KEY));
    match document {
        Some(document) => parse_overrides(&document),
        None => Ok(Overrides::default()),
    }
}
