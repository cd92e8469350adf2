//! LogPipeline CRD
//!
//! A LogPipeline describes one flow of application container logs to a single
//! destination. Every admitted pipeline becomes a chain of Fluent Bit sections
//! in the shared agent configuration.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ValueFromSource, ValueType};

/// LogPipeline routes container logs of selected namespaces/containers to
/// one output.
///
/// Example:
/// ```yaml
/// apiVersion: telemetry.kyma-project.io/v1beta1
/// kind: LogPipeline
/// metadata:
///   name: backend
/// spec:
///   input:
///     application:
///       namespaces:
///         include: [shop]
///   filters:
///     - custom: |
///         name grep
///         regex log error
///   output:
///     http:
///       host:
///         value: logs.example.com
///       password:
///         valueFrom:
///           secretKeyRef: {name: creds, namespace: default, key: password}
///       dedot: true
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "telemetry.kyma-project.io",
    version = "v1beta1",
    kind = "LogPipeline",
    status = "LogPipelineStatus",
    printcolumn = r#"{"name":"Configuration Generated","type":"string","jsonPath":".status.conditions[?(@.type==\"ConfigurationGenerated\")].status"}"#,
    printcolumn = r#"{"name":"Agent Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"AgentHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Flow Healthy","type":"string","jsonPath":".status.conditions[?(@.type==\"FlowHealthy\")].status"}"#,
    printcolumn = r#"{"name":"Unsupported Mode","type":"boolean","jsonPath":".status.unsupportedMode"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineSpec {
    /// Which container logs are collected
    #[serde(default)]
    pub input: LogPipelineInput,

    /// Custom filters, applied in declaration order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<LogPipelineFilter>,

    /// Destination of the logs
    #[serde(default)]
    pub output: LogPipelineOutput,

    /// Files mounted into the agent, referenced from custom sections
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<LogPipelineFile>,

    /// Environment variables made available to custom sections
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<LogPipelineVariableRef>,
}

/// Input configuration
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineInput {
    /// Application container logs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<LogPipelineApplicationInput>,
}

/// Selection of application container logs
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineApplicationInput {
    /// Collect application logs at all (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Namespace selection
    #[serde(default)]
    pub namespaces: LogPipelineNamespaceSelector,

    /// Container selection
    #[serde(default)]
    pub containers: LogPipelineContainerSelector,

    /// Keep Kubernetes annotations in the record (default: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_annotations: Option<bool>,

    /// Drop Kubernetes labels from the record (default: false)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drop_labels: Option<bool>,

    /// Keep the original log line next to the parsed one (default: true)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_original_body: Option<bool>,
}

/// Namespace selection. At most one of the fields may be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineNamespaceSelector {
    /// Only these namespaces
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// All namespaces except these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    /// Also collect from system namespaces
    #[serde(default)]
    pub system: bool,
}

/// Container selection. At most one of the fields may be set.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineContainerSelector {
    /// Only these containers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,

    /// All containers except these
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
}

/// One custom filter
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineFilter {
    /// Raw Fluent Bit filter parameters, one `key value` per line
    #[serde(default)]
    pub custom: String,
}

/// Output definition; exactly one variant must be set
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineOutput {
    /// Raw Fluent Bit output parameters, one `key value` per line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom: Option<String>,

    /// Managed HTTP output
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<LogPipelineHttpOutput>,
}

/// The output variant a pipeline uses
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutputKind<'a> {
    /// Managed HTTP output
    Http(&'a LogPipelineHttpOutput),
    /// User-provided Fluent Bit output block
    Custom(&'a str),
}

impl LogPipelineOutput {
    /// Resolve the variant. `None` unless exactly one variant is set.
    pub fn kind(&self) -> Option<OutputKind<'_>> {
        let custom = self.custom.as_deref().filter(|c| !c.trim().is_empty());
        match (self.http.as_ref(), custom) {
            (Some(http), None) => Some(OutputKind::Http(http)),
            (None, Some(custom)) => Some(OutputKind::Custom(custom)),
            _ => None,
        }
    }

    /// Number of output variants set
    pub fn defined_count(&self) -> usize {
        let custom = self.custom.as_deref().is_some_and(|c| !c.trim().is_empty());
        usize::from(self.http.is_some()) + usize::from(custom)
    }
}

/// HTTP output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineHttpOutput {
    /// Target host
    #[serde(default)]
    pub host: ValueType,

    /// Basic auth user
    #[serde(default, skip_serializing_if = "ValueType::is_empty")]
    pub user: ValueType,

    /// Basic auth password
    #[serde(default, skip_serializing_if = "ValueType::is_empty")]
    pub password: ValueType,

    /// Request path, must start with `/`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uri: String,

    /// Target port (default: 443)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub port: String,

    /// Payload compression, e.g. `gzip`
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub compress: String,

    /// Payload format (default: json)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub format: String,

    /// TLS settings
    #[serde(default)]
    pub tls: LogPipelineOutputTls,

    /// Replace dots and slashes in Kubernetes label/annotation keys
    #[serde(default)]
    pub dedot: bool,
}

/// TLS settings of the HTTP output
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineOutputTls {
    /// Disable TLS entirely
    #[serde(default)]
    pub disabled: bool,

    /// Skip verification of the server certificate
    #[serde(default)]
    pub skip_certificate_validation: bool,

    /// PEM CA bundle
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca: Option<ValueType>,

    /// PEM client certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<ValueType>,

    /// PEM client key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<ValueType>,
}

impl LogPipelineOutputTls {
    /// CA, if one is configured
    pub fn ca(&self) -> Option<&ValueType> {
        self.ca.as_ref().filter(|v| v.is_defined())
    }

    /// Client certificate, if one is configured
    pub fn cert(&self) -> Option<&ValueType> {
        self.cert.as_ref().filter(|v| v.is_defined())
    }

    /// Client key, if one is configured
    pub fn key(&self) -> Option<&ValueType> {
        self.key.as_ref().filter(|v| v.is_defined())
    }

    /// Client certificate and key, only when both are configured
    pub fn cert_key_pair(&self) -> Option<(&ValueType, &ValueType)> {
        Some((self.cert()?, self.key()?))
    }
}

/// File mounted into the agent under `/files/<name>`
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineFile {
    /// File name
    pub name: String,
    /// File content
    pub content: String,
}

/// Environment variable populated from a secret key
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineVariableRef {
    /// Variable name as used in custom sections (`${NAME}`)
    pub name: String,
    /// Secret key the value is read from
    #[serde(default)]
    pub value_from: ValueFromSource,
}

/// Observed state of a LogPipeline
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogPipelineStatus {
    /// Conditions: AgentHealthy, ConfigurationGenerated, FlowHealthy
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,

    /// True when a custom filter or custom output is used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsupported_mode: Option<bool>,
}

impl LogPipelineSpec {
    /// Application input settings, defaulted when absent
    pub fn application_input(&self) -> LogPipelineApplicationInput {
        self.input.application.clone().unwrap_or_default()
    }

    /// False only when application input is explicitly disabled
    pub fn application_input_enabled(&self) -> bool {
        self.input
            .application
            .as_ref()
            .and_then(|a| a.enabled)
            .unwrap_or(true)
    }

    /// True when any filter or the output is a raw Fluent Bit block
    pub fn uses_custom_plugins(&self) -> bool {
        !self.filters.is_empty()
            || self
                .output
                .custom
                .as_deref()
                .is_some_and(|c| !c.trim().is_empty())
    }

    /// Every value in the spec that references a secret key
    pub fn secret_values(&self) -> Vec<&ValueType> {
        let mut values = Vec::new();
        if let Some(http) = &self.output.http {
            values.extend([&http.host, &http.user, &http.password]);
            values.extend(
                [&http.tls.ca, &http.tls.cert, &http.tls.key]
                    .into_iter()
                    .flatten(),
            );
        }
        values.retain(|v| v.secret_key_ref().is_some());
        values
    }
}

impl LogPipeline {
    /// True when the API server has started deleting this pipeline
    pub fn is_being_deleted(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }
}
