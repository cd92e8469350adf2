//! Custom Resource Definitions for the telemetry operator

mod log_pipeline;
mod types;

pub use log_pipeline::{
    LogPipeline, LogPipelineApplicationInput, LogPipelineContainerSelector, LogPipelineFile,
    LogPipelineFilter, LogPipelineHttpOutput, LogPipelineInput, LogPipelineNamespaceSelector,
    LogPipelineOutput, LogPipelineOutputTls, LogPipelineSpec, LogPipelineStatus,
    LogPipelineVariableRef, OutputKind,
};
pub use types::{
    find_condition, set_condition, Condition, ConditionStatus, SecretKeyRef, ValueFromSource,
    ValueSource, ValueType,
};
