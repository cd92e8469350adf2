//! LogPipeline status conditions
//!
//! Three conditions are derived per reconcile: `AgentHealthy` from the
//! DaemonSet, `ConfigurationGenerated` from validation and admission, and
//! `FlowHealthy` from self-monitoring. The status is patched only when it
//! differs from what the pipeline already carries.

use kube::ResourceExt;
use tracing::{debug, warn};

use telemetry_common::conditions::{
    message_for, REASON_AGENT_CONFIGURED, REASON_MAX_PIPELINES_EXCEEDED,
    REASON_NO_FLUENTBIT_IN_FIPS_MODE, REASON_SELF_MON_AGENT_PROBING_FAILED,
    REASON_SELF_MON_ALL_DATA_DROPPED, REASON_SELF_MON_BUFFER_FILLING_UP,
    REASON_SELF_MON_CONFIG_NOT_GENERATED, REASON_SELF_MON_FLOW_HEALTHY,
    REASON_SELF_MON_NO_LOGS_DELIVERED, REASON_SELF_MON_SOME_DATA_DROPPED, TYPE_AGENT_HEALTHY,
    TYPE_CONFIGURATION_GENERATED, TYPE_FLOW_HEALTHY,
};
use telemetry_common::crd::{set_condition, Condition, ConditionStatus, LogPipeline};
use telemetry_common::Error;

use crate::client::LogPipelineKubeClient;
use crate::config::ReconcilerConfig;
use crate::probe::{self, AgentReadiness, FlowHealthProbeResult, FlowHealthProber};
use crate::validation::ValidationError;

/// Where a pipeline ended up in the current reconcile
#[derive(Debug)]
pub enum ConfigState {
    /// Validated and admitted
    Generated,
    /// Admitted with a warning, or rejected by validation
    Invalid(ValidationError),
    /// Valid but the lock is full
    MaxPipelinesExceeded,
    /// The operator refuses Fluent Bit pipelines
    FipsMode,
}

/// Status, reason and message of `ConfigurationGenerated`
pub fn config_generated(state: &ConfigState) -> (ConditionStatus, &'static str, String) {
    let default = |status, reason| (status, reason, message_for(reason).to_string());
    match state {
        ConfigState::Generated => default(ConditionStatus::True, REASON_AGENT_CONFIGURED),
        ConfigState::MaxPipelinesExceeded => {
            default(ConditionStatus::False, REASON_MAX_PIPELINES_EXCEEDED)
        }
        ConfigState::FipsMode => default(ConditionStatus::False, REASON_NO_FLUENTBIT_IN_FIPS_MODE),
        ConfigState::Invalid(err) => {
            let status = if err.is_informative() {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            };
            (status, err.reason(), err.message())
        }
    }
}

/// Reason for a probe result: all dropped > some dropped > no logs
/// delivered > buffer filling up > healthy
pub fn flow_health_reason(result: &FlowHealthProbeResult) -> &'static str {
    if result.all_data_dropped {
        REASON_SELF_MON_ALL_DATA_DROPPED
    } else if result.some_data_dropped {
        REASON_SELF_MON_SOME_DATA_DROPPED
    } else if result.no_logs_delivered {
        REASON_SELF_MON_NO_LOGS_DELIVERED
    } else if result.buffer_filling_up {
        REASON_SELF_MON_BUFFER_FILLING_UP
    } else {
        REASON_SELF_MON_FLOW_HEALTHY
    }
}

/// Status and reason of `FlowHealthy`
pub fn flow_healthy(
    config_status: ConditionStatus,
    probe: Result<FlowHealthProbeResult, &Error>,
) -> (ConditionStatus, &'static str) {
    if config_status == ConditionStatus::False {
        return (ConditionStatus::False, REASON_SELF_MON_CONFIG_NOT_GENERATED);
    }
    match probe {
        Err(_) => (ConditionStatus::Unknown, REASON_SELF_MON_AGENT_PROBING_FAILED),
        Ok(result) => {
            let status = if result.healthy {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            };
            (status, flow_health_reason(&result))
        }
    }
}

/// Derive every condition and patch the status if it changed.
///
/// Prober failures end up in the conditions, they are not returned.
pub async fn update_status(
    kube: &dyn LogPipelineKubeClient,
    flow_prober: &dyn FlowHealthProber,
    config: &ReconcilerConfig,
    pipeline: &LogPipeline,
    state: &ConfigState,
) -> Result<(), Error> {
    let name = pipeline.name_any();
    let generation = pipeline.metadata.generation;
    let old = pipeline.status.clone().unwrap_or_default();
    let mut status = old.clone();

    let readiness = match probe::probe_agent(kube, config).await {
        Ok(readiness) => readiness,
        Err(e) => {
            warn!(pipeline = %name, error = %e, "failed to probe agent");
            AgentReadiness::NotReady("Failed to get Fluent Bit agent DaemonSet".to_string())
        }
    };
    let (agent_status, agent_reason, agent_message) = readiness.condition();
    set_condition(
        &mut status.conditions,
        Condition::new(TYPE_AGENT_HEALTHY, agent_status, agent_reason, agent_message)
            .observed(generation),
    );

    let (config_status, config_reason, config_message) = config_generated(state);
    set_condition(
        &mut status.conditions,
        Condition::new(
            TYPE_CONFIGURATION_GENERATED,
            config_status,
            config_reason,
            config_message,
        )
        .observed(generation),
    );

    let probe = if config_status == ConditionStatus::False {
        None
    } else {
        Some(flow_prober.probe(&name).await)
    };
    if let Some(Err(e)) = &probe {
        warn!(pipeline = %name, error = %e, "failed to probe flow health");
    }
    let probe = match &probe {
        Some(Ok(result)) => Ok(*result),
        Some(Err(e)) => Err(e),
        None => Ok(FlowHealthProbeResult::default()),
    };
    let (flow_status, flow_reason) = flow_healthy(config_status, probe);
    set_condition(
        &mut status.conditions,
        Condition::new(
            TYPE_FLOW_HEALTHY,
            flow_status,
            flow_reason,
            message_for(flow_reason),
        )
        .observed(generation),
    );

    status.unsupported_mode = Some(pipeline.spec.uses_custom_plugins());

    if status == old {
        debug!(pipeline = %name, "status unchanged");
        return Ok(());
    }
    kube.patch_pipeline_status(&name, &status).await
}
