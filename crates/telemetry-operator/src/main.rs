//! Telemetry Operator - reconciles LogPipelines into a shared Fluent Bit agent

mod controller_runner;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use kube::CustomResourceExt;

use telemetry_common::crd::LogPipeline;
use telemetry_common::kube_utils::create_client;
use telemetry_common::telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use telemetry_common::DEFAULT_TELEMETRY_NAMESPACE;
use telemetry_fluentbit::{RenderConfig, DEFAULT_CLUSTER_NAME, DEFAULT_FS_BUFFER_LIMIT};
use telemetry_logpipeline::config::{
    AgentImages, DEFAULT_CHOWN_INIT_IMAGE, DEFAULT_EXPORTER_IMAGE, DEFAULT_FLUENT_BIT_IMAGE,
    DEFAULT_MAX_PIPELINES, DEFAULT_OVERRIDES_CONFIG_MAP,
};
use telemetry_logpipeline::probe::PrometheusFlowHealthProber;
use telemetry_logpipeline::{Context, LogPipelineKubeClientImpl, ReconcilerConfig};

const DEFAULT_SELF_MONITOR_URL: &str = "http://telemetry-self-monitor.kyma-system:9090";

/// Telemetry operator - turns LogPipelines into Fluent Bit configuration
#[derive(Parser, Debug)]
#[command(name = "telemetry-operator", version, about, long_about = None)]
struct Cli {
    /// Print the LogPipeline CRD and exit
    #[arg(long)]
    crd: bool,

    /// Namespace of the agent and its artifacts
    #[arg(long, env = "TELEMETRY_NAMESPACE", default_value = DEFAULT_TELEMETRY_NAMESPACE)]
    telemetry_namespace: String,

    /// Value of `cluster_identifier` on every record unless the Telemetry
    /// resource or the Gardener shoot names the cluster; by default Fluent
    /// Bit substitutes the API server host
    #[arg(long, env = "CLUSTER_NAME", default_value = DEFAULT_CLUSTER_NAME)]
    cluster_name: String,

    /// Fluent Bit image
    #[arg(long, env = "FLUENT_BIT_IMAGE", default_value = DEFAULT_FLUENT_BIT_IMAGE)]
    fluent_bit_image: String,

    /// Filesystem-buffer exporter image
    #[arg(long, env = "FLUENT_BIT_EXPORTER_IMAGE", default_value = DEFAULT_EXPORTER_IMAGE)]
    exporter_image: String,

    /// Checkpoint ownership init container image
    #[arg(long, env = "CHOWN_INIT_IMAGE", default_value = DEFAULT_CHOWN_INIT_IMAGE)]
    chown_init_image: String,

    /// PriorityClass of the agent pods
    #[arg(long, env = "PRIORITY_CLASS_NAME", default_value = "")]
    priority_class_name: String,

    /// Pipelines admitted at once, 0 for unlimited
    #[arg(long, env = "MAX_LOG_PIPELINES", default_value_t = DEFAULT_MAX_PIPELINES)]
    max_pipelines: usize,

    /// Filesystem buffer limit per output
    #[arg(long, env = "FS_BUFFER_LIMIT", default_value = DEFAULT_FS_BUFFER_LIMIT)]
    fs_buffer_limit: String,

    /// Also collect the agent's own logs
    #[arg(long, env = "COLLECT_AGENT_LOGS")]
    collect_agent_logs: bool,

    /// Accept pipelines with a raw custom output
    #[arg(
        long,
        env = "ALLOW_CUSTOM_OUTPUTS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    allow_custom_outputs: bool,

    /// Refuse Fluent Bit pipelines
    #[arg(long, env = "OPERATE_IN_FIPS_MODE")]
    fips_mode: bool,

    /// ConfigMap in the telemetry namespace holding overrides
    #[arg(long, env = "OVERRIDES_CONFIG_MAP", default_value = DEFAULT_OVERRIDES_CONFIG_MAP)]
    overrides_config_map: String,

    /// Self-monitor Prometheus queried for flow health
    #[arg(long, env = "SELF_MONITOR_URL", default_value = DEFAULT_SELF_MONITOR_URL)]
    self_monitor_url: String,

    /// Log output format (json or text)
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    /// Kubeconfig to use instead of the in-cluster configuration
    #[arg(long, env = "KUBECONFIG")]
    kubeconfig: Option<PathBuf>,
}

impl Cli {
    fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            namespace: self.telemetry_namespace.clone(),
            images: AgentImages {
                fluent_bit: self.fluent_bit_image.clone(),
                exporter: self.exporter_image.clone(),
                chown_init: self.chown_init_image.clone(),
            },
            priority_class_name: self.priority_class_name.clone(),
            max_pipelines: self.max_pipelines,
            fips_mode: self.fips_mode,
            render: RenderConfig {
                cluster_name: self.cluster_name.clone(),
                collect_agent_logs: self.collect_agent_logs,
                fs_buffer_limit: self.fs_buffer_limit.clone(),
                allow_custom_outputs: self.allow_custom_outputs,
            },
            overrides_config_map: self.overrides_config_map.clone(),
            ..Default::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&LogPipeline::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        format: cli.log_format,
        ..Default::default()
    })?;

    let config = cli.reconciler_config();
    tracing::info!(
        namespace = %config.namespace,
        cluster = %config.render.cluster_name,
        max_pipelines = config.max_pipelines,
        fips_mode = config.fips_mode,
        "starting telemetry operator"
    );

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let prober = PrometheusFlowHealthProber::new(&cli.self_monitor_url)?;
    let ctx = Arc::new(Context::new(
        Arc::new(LogPipelineKubeClientImpl::new(client.clone())),
        Arc::new(prober),
        config,
    ));

    controller_runner::run_log_pipeline_controller(client, ctx).await;
    tracing::info!("telemetry operator stopped");
    Ok(())
}
