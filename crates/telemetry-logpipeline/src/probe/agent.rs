//! Agent readiness from the DaemonSet and its pods

use chrono::{DateTime, Duration, Utc};
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

use telemetry_common::conditions::{
    message_for, REASON_AGENT_NOT_READY, REASON_AGENT_READY, REASON_ROLLOUT_IN_PROGRESS,
};
use telemetry_common::crd::ConditionStatus;

/// Pods younger than this are still starting; their problems are not reported
pub const POD_PROBLEM_THRESHOLD_MINUTES: i64 = 5;

const ROLLOUT_MESSAGE: &str = "Pods are being started/updated";

/// Readiness of the agent DaemonSet
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AgentReadiness {
    /// Every desired pod is updated and ready
    Ready,
    /// Pods are starting or updating without known problems
    RolloutInProgress,
    /// The agent cannot serve; the message names the cause
    NotReady(String),
}

impl AgentReadiness {
    /// Status, reason and message of the `AgentHealthy` condition
    pub fn condition(&self) -> (ConditionStatus, &'static str, String) {
        match self {
            Self::Ready => (
                ConditionStatus::True,
                REASON_AGENT_READY,
                message_for(REASON_AGENT_READY).to_string(),
            ),
            Self::RolloutInProgress => (
                ConditionStatus::True,
                REASON_ROLLOUT_IN_PROGRESS,
                ROLLOUT_MESSAGE.to_string(),
            ),
            Self::NotReady(message) => (
                ConditionStatus::False,
                REASON_AGENT_NOT_READY,
                message.clone(),
            ),
        }
    }
}

/// Classify the agent at `now`
pub fn classify(daemon_set: Option<&DaemonSet>, pods: &[Pod], now: DateTime<Utc>) -> AgentReadiness {
    let Some(daemon_set) = daemon_set else {
        return AgentReadiness::NotReady("Fluent Bit agent DaemonSet is not yet created".to_string());
    };
    let status = daemon_set.status.clone().unwrap_or_default();
    if status.desired_number_scheduled == 0 {
        return AgentReadiness::NotReady("No Fluent Bit agent pods deployed".to_string());
    }

    let threshold = Duration::minutes(POD_PROBLEM_THRESHOLD_MINUTES);
    for pod in pods {
        let started = pod
            .metadata
            .creation_timestamp
            .as_ref()
            .map(|t| t.0)
            .unwrap_or(now);
        if now - started < threshold {
            continue;
        }
        if let Some(problem) = pod_problem(pod) {
            return AgentReadiness::NotReady(problem);
        }
    }

    let updated = status.updated_number_scheduled.unwrap_or_default();
    if status.number_ready < status.desired_number_scheduled
        || updated < status.desired_number_scheduled
    {
        return AgentReadiness::RolloutInProgress;
    }
    AgentReadiness::Ready
}

fn pod_problem(pod: &Pod) -> Option<String> {
    let status = pod.status.as_ref()?;
    let phase = status.phase.as_deref().unwrap_or_default();

    if phase == "Failed" {
        let reason = status.reason.as_deref().unwrap_or("unknown");
        if reason == "Evicted" {
            return Some(format!(
                "Pod is evicted: {}",
                status.message.as_deref().unwrap_or_default()
            ));
        }
        return Some(format!("Pod is in the failed state due to: {reason}"));
    }

    let containers = status.container_statuses.as_deref().unwrap_or_default();
    if phase == "Pending" && containers.is_empty() {
        let unscheduled = status
            .conditions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .find(|c| c.type_ == "PodScheduled" && c.status == "False");
        return unscheduled.map(|c| {
            format!(
                "Pod is not scheduled: {}",
                c.message.as_deref().unwrap_or_default()
            )
        });
    }

    containers.iter().find_map(container_problem).map(|(name, reason)| {
        format!("Pod is in the pending state as container: {name} is not running due to: {reason}")
    })
}

fn container_problem(container: &ContainerStatus) -> Option<(String, String)> {
    let state = container.state.as_ref()?;
    let last_terminated = container
        .last_state
        .as_ref()
        .and_then(|s| s.terminated.as_ref());

    if let Some(waiting) = state.waiting.as_ref() {
        let reason = waiting.reason.as_deref().unwrap_or_default();
        if reason == "CrashLoopBackOff" {
            let oom = last_terminated.and_then(|t| t.reason.as_deref()) == Some("OOMKilled");
            let cause = if oom { "OOMKilled" } else { "CrashLoopBackOff" };
            return Some((container.name.clone(), cause.to_string()));
        }
        if !reason.is_empty() && reason != "ContainerCreating" && reason != "PodInitializing" {
            let detail = waiting.message.as_deref().unwrap_or(reason);
            return Some((container.name.clone(), detail.to_string()));
        }
        return None;
    }

    if let Some(terminated) = state.terminated.as_ref() {
        if terminated.exit_code != 0 {
            let reason = terminated.reason.as_deref().unwrap_or("Error");
            return Some((
                container.name.clone(),
                format!("{reason} (exit code {})", terminated.exit_code),
            ));
        }
    }
    None
}
