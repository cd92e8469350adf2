//! Probers feeding the `AgentHealthy` and `FlowHealthy` conditions

pub mod agent;
pub mod flow_health;

use chrono::Utc;

use telemetry_common::Error;

use crate::client::LogPipelineKubeClient;
use crate::config::ReconcilerConfig;
use crate::resources::selector_string;

pub use agent::AgentReadiness;
pub use flow_health::{FlowHealthProbeResult, FlowHealthProber, PrometheusFlowHealthProber};

/// Read the agent DaemonSet and its pods and classify them
pub async fn probe_agent(
    kube: &dyn LogPipelineKubeClient,
    config: &ReconcilerConfig,
) -> Result<AgentReadiness, Error> {
    let daemon_set = kube
        .get_daemon_set(&config.namespace, &config.names.daemon_set)
        .await?;
    let pods = match daemon_set {
        Some(_) => {
            kube.list_pods(&config.namespace, &selector_string(config))
                .await?
        }
        None => Vec::new(),
    };
    Ok(agent::classify(daemon_set.as_ref(), &pods, Utc::now()))
}
