//! Condition types, reasons and user-facing messages for LogPipeline status

/// Condition type: the Fluent Bit DaemonSet is healthy
pub const TYPE_AGENT_HEALTHY: &str = "AgentHealthy";
/// Condition type: the pipeline made it into the agent configuration
pub const TYPE_CONFIGURATION_GENERATED: &str = "ConfigurationGenerated";
/// Condition type: self-monitoring reports logs flowing
pub const TYPE_FLOW_HEALTHY: &str = "FlowHealthy";

/// Agent DaemonSet is ready
pub const REASON_AGENT_READY: &str = "AgentReady";
/// Agent DaemonSet is not ready
pub const REASON_AGENT_NOT_READY: &str = "AgentNotReady";
/// Agent DaemonSet is rolling out a new revision
pub const REASON_ROLLOUT_IN_PROGRESS: &str = "RolloutInProgress";

/// Pipeline rendered into the agent configuration
pub const REASON_AGENT_CONFIGURED: &str = "AgentConfigured";
/// Pipeline lock is full
pub const REASON_MAX_PIPELINES_EXCEEDED: &str = "MaxPipelinesExceeded";
/// A referenced secret or key does not exist
pub const REASON_REFERENCED_SECRET_MISSING: &str = "ReferencedSecretMissing";
/// The output endpoint is malformed
pub const REASON_ENDPOINT_INVALID: &str = "EndpointInvalid";
/// A TLS certificate is past its expiry
pub const REASON_TLS_CERTIFICATE_EXPIRED: &str = "TLSCertificateExpired";
/// A TLS certificate expires soon
pub const REASON_TLS_CERTIFICATE_ABOUT_TO_EXPIRE: &str = "TLSCertificateAboutToExpire";
/// TLS material cannot be decoded or does not fit together
pub const REASON_TLS_CONFIGURATION_INVALID: &str = "TLSConfigurationInvalid";
/// Validation could not complete or the spec is malformed
pub const REASON_VALIDATION_FAILED: &str = "ValidationFailed";
/// Fluent Bit pipelines are not supported in FIPS mode
pub const REASON_NO_FLUENTBIT_IN_FIPS_MODE: &str = "NoFluentbitInFipsMode";

/// Self-monitoring: flow is healthy
pub const REASON_SELF_MON_FLOW_HEALTHY: &str = "FlowHealthy";
/// Self-monitoring: nothing is delivered, everything is dropped
pub const REASON_SELF_MON_ALL_DATA_DROPPED: &str = "SelfMonAgentAllDataDropped";
/// Self-monitoring: part of the data is dropped
pub const REASON_SELF_MON_SOME_DATA_DROPPED: &str = "SelfMonAgentSomeDataDropped";
/// Self-monitoring: logs are read but none are delivered
pub const REASON_SELF_MON_NO_LOGS_DELIVERED: &str = "SelfMonAgentNoLogsDelivered";
/// Self-monitoring: filesystem buffer is filling up
pub const REASON_SELF_MON_BUFFER_FILLING_UP: &str = "SelfMonAgentBufferFillingUp";
/// Self-monitoring: flow not evaluated because the configuration was not generated
pub const REASON_SELF_MON_CONFIG_NOT_GENERATED: &str = "SelfMonConfigNotGenerated";
/// Self-monitoring: the prober could not be queried
pub const REASON_SELF_MON_AGENT_PROBING_FAILED: &str = "SelfMonAgentProbingFailed";

/// Default user-facing message for a reason. Empty for reasons whose message
/// is always built from the underlying error.
pub fn message_for(reason: &str) -> &'static str {
    match reason {
        REASON_AGENT_READY => "Fluent Bit agent DaemonSet is ready",
        REASON_AGENT_CONFIGURED => {
            "LogPipeline specification is successfully applied to the configuration of Fluent Bit agent"
        }
        REASON_MAX_PIPELINES_EXCEEDED => "Maximum pipeline count limit exceeded",
        REASON_VALIDATION_FAILED => {
            "Pipeline validation failed due to an error from the Kubernetes API server"
        }
        REASON_NO_FLUENTBIT_IN_FIPS_MODE => {
            "Fluent Bit based LogPipelines are not supported when the operator runs in FIPS mode"
        }
        REASON_SELF_MON_FLOW_HEALTHY => "No problems detected in the telemetry flow",
        REASON_SELF_MON_ALL_DATA_DROPPED => {
            "Backend is not reachable or rejecting logs. All logs are dropped"
        }
        REASON_SELF_MON_SOME_DATA_DROPPED => {
            "Backend is reachable, but rejecting logs. Some logs are dropped"
        }
        REASON_SELF_MON_NO_LOGS_DELIVERED => {
            "No logs delivered to backend because LogPipeline specification is not applied to the configuration of Fluent Bit agent, or the backend is not reachable"
        }
        REASON_SELF_MON_BUFFER_FILLING_UP => {
            "Buffer nearing capacity. Incoming log rate exceeds export rate"
        }
        REASON_SELF_MON_CONFIG_NOT_GENERATED => {
            "No logs delivered to backend because LogPipeline specification is not applied to the configuration of Fluent Bit agent"
        }
        REASON_SELF_MON_AGENT_PROBING_FAILED => {
            "Could not determine the health of the telemetry flow because the self monitor probing failed"
        }
        _ => "",
    }
}
