//! Reconciler configuration, built once at startup and injected into the
//! controller context

use std::time::Duration;

use telemetry_common::DEFAULT_TELEMETRY_NAMESPACE;
use telemetry_fluentbit::RenderConfig;

/// Default Fluent Bit image
pub const DEFAULT_FLUENT_BIT_IMAGE: &str =
    "europe-docker.pkg.dev/kyma-project/prod/external/fluent/fluent-bit:4.0.3";
/// Default filesystem-buffer exporter image
pub const DEFAULT_EXPORTER_IMAGE: &str =
    "europe-docker.pkg.dev/kyma-project/prod/directory-size-exporter:v20250724-e2c8a7f2";
/// Default image of the init container fixing checkpoint directory ownership
pub const DEFAULT_CHOWN_INIT_IMAGE: &str =
    "europe-docker.pkg.dev/kyma-project/prod/external/library/busybox:1.37.0-uclibc";
/// Default number of pipelines the lock admits
pub const DEFAULT_MAX_PIPELINES: usize = 3;
/// Default periodic requeue, keeps flow health fresh
pub const DEFAULT_REQUEUE_INTERVAL: Duration = Duration::from_secs(60);
/// Default ConfigMap holding operator overrides
pub const DEFAULT_OVERRIDES_CONFIG_MAP: &str = "telemetry-override-config";

/// Names of every object making up the Fluent Bit agent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentNames {
    /// DaemonSet, ServiceAccount, ClusterRole(Binding), NetworkPolicy and base ConfigMap
    pub daemon_set: String,
    /// Lua filter script ConfigMap
    pub lua_config_map: String,
    /// User parsers ConfigMap, created once and never overwritten
    pub parsers_config_map: String,
    /// Rendered per-pipeline sections
    pub sections_config_map: String,
    /// Files mounted from pipeline specs
    pub files_config_map: String,
    /// Secret values exposed to the agent as environment
    pub env_config_secret: String,
    /// TLS material mounted as files
    pub tls_file_config_secret: String,
    /// Service scraping Fluent Bit's own metrics
    pub metrics_service: String,
    /// Service scraping the filesystem-buffer exporter
    pub exporter_metrics_service: String,
    /// ConfigMap whose owner references are the admitted pipelines
    pub lock: String,
}

impl AgentNames {
    /// Derive every name from the DaemonSet's base name
    pub fn from_base(base: &str) -> Self {
        Self {
            daemon_set: base.to_string(),
            lua_config_map: format!("{}-luascripts", base),
            parsers_config_map: format!("{}-parsers", base),
            sections_config_map: format!("{}-sections", base),
            files_config_map: format!("{}-files", base),
            env_config_secret: format!("{}-env", base),
            tls_file_config_secret: format!("{}-output-tls-config", base),
            metrics_service: format!("{}-metrics", base),
            exporter_metrics_service: format!("{}-exporter-metrics", base),
            lock: format!("{}-lock", base),
        }
    }
}

impl Default for AgentNames {
    fn default() -> Self {
        Self::from_base("telemetry-fluent-bit")
    }
}

/// Images used by the agent DaemonSet
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentImages {
    /// Fluent Bit
    pub fluent_bit: String,
    /// Filesystem-buffer exporter sidecar
    pub exporter: String,
    /// Checkpoint ownership init container
    pub chown_init: String,
}

impl Default for AgentImages {
    fn default() -> Self {
        Self {
            fluent_bit: DEFAULT_FLUENT_BIT_IMAGE.to_string(),
            exporter: DEFAULT_EXPORTER_IMAGE.to_string(),
            chown_init: DEFAULT_CHOWN_INIT_IMAGE.to_string(),
        }
    }
}

/// Everything the LogPipeline reconciler needs to know about its environment
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Namespace of the agent and its artifacts
    pub namespace: String,
    /// Agent object names
    pub names: AgentNames,
    /// Agent images
    pub images: AgentImages,
    /// PriorityClass of the agent pods, empty for none
    pub priority_class_name: String,
    /// Pipelines the lock admits
    pub max_pipelines: usize,
    /// Fluent Bit pipelines are refused in FIPS mode
    pub fips_mode: bool,
    /// Renderer defaults
    pub render: RenderConfig,
    /// Requeue interval after a successful reconcile
    pub requeue_interval: Duration,
    /// Overrides ConfigMap in `namespace`
    pub overrides_config_map: String,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_TELEMETRY_NAMESPACE.to_string(),
            names: AgentNames::default(),
            images: AgentImages::default(),
            priority_class_name: String::new(),
            max_pipelines: DEFAULT_MAX_PIPELINES,
            fips_mode: false,
            render: RenderConfig::default(),
            requeue_interval: DEFAULT_REQUEUE_INTERVAL,
            overrides_config_map: DEFAULT_OVERRIDES_CONFIG_MAP.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_derive_from_base() {
        let names = AgentNames::default();
        assert_eq!(names.daemon_set, "telemetry-fluent-bit");
        assert_eq!(names.sections_config_map, "telemetry-fluent-bit-sections");
        assert_eq!(names.tls_file_config_secret, "telemetry-fluent-bit-output-tls-config");
        assert_eq!(names.exporter_metrics_service, "telemetry-fluent-bit-exporter-metrics");
        assert_eq!(names.lock, "telemetry-fluent-bit-lock");
    }

    #[test]
    fn default_admits_three_pipelines() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.max_pipelines, 3);
        assert_eq!(config.namespace, "kyma-system");
        assert!(!config.fips_mode);
    }
}
