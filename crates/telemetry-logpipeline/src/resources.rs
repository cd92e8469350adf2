//! Fluent Bit agent objects
//!
//! Pure builders for every object the agent consists of, plus the checksum
//! that rolls the DaemonSet when any configuration input changes. Nothing in
//! here talks to the API server; [`crate::agent`] applies what these return.

use std::collections::BTreeMap;
use std::fmt;

use aws_lc_rs::digest;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{
    ConfigMap, Secret, Service, ServiceAccount, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;
use kube::discovery::ApiResource;
use serde_json::json;

use telemetry_common::kube_utils::{standard_labels, LABEL_INSTANCE, LABEL_NAME};
use telemetry_common::{Error, FLUENT_BIT_EXPORTER_METRICS_PORT, FLUENT_BIT_HTTP_PORT};

use crate::config::ReconcilerConfig;

/// Pod template annotation carrying the configuration checksum
pub const ANNOTATION_CHECKSUM_CONFIG: &str = "checksum/config";
/// Pod template annotation excluding agent ports from sidecar interception
pub const ANNOTATION_ISTIO_EXCLUDE_INBOUND_PORTS: &str =
    "traffic.sidecar.istio.io/excludeInboundPorts";
/// Pod label requesting sidecar injection
pub const LABEL_ISTIO_INJECT: &str = "sidecar.istio.io/inject";

/// Key of the main configuration in the base ConfigMap
pub const FLUENT_BIT_CONF_KEY: &str = "fluent-bit.conf";
/// Key of the parsers include in the base ConfigMap
pub const CUSTOM_PARSERS_KEY: &str = "custom_parsers.conf";
/// Key of the Lua script in the Lua ConfigMap
pub const LUA_SCRIPT_KEY: &str = "filter-script.lua";
/// Key of the user parsers in the parsers ConfigMap
pub const PARSERS_KEY: &str = "parsers.conf";

const FLUENT_BIT_USER: i64 = 10001;
const ROOT_GROUP: i64 = 0;

const STORAGE_PATH: &str = "/data/flb-storage/";
const PROMETHEUS_METRICS_PATH: &str = "/api/v2/metrics/prometheus";

/// `[SERVICE]` block of the agent; pipeline sections are pulled in from
/// `dynamic/`
const BASE_CONFIG: &str = "
[SERVICE]
    Daemon Off
    Flush 1
    Log_Level warn
    HTTP_Server On
    HTTP_Listen 0.0.0.0
    HTTP_Port 2020
    storage.path /data/flb-storage/
    storage.metrics on

@INCLUDE dynamic/*.conf
";

const CUSTOM_PARSERS_CONFIG: &str = "@INCLUDE dynamic-parsers/parsers.conf\n";

/// Enrichment called by the Lua filter of HTTP outputs. `app_name` comes
/// from the well-known name labels; the dedot variant also rewrites `.` and
/// `/` in label and annotation keys.
const LUA_FILTER_SCRIPT: &str = r#"
function enrich_app_name(tag, timestamp, record)
  if record.kubernetes == nil then
    return 0
  end
  enrich_app_name_internal(record.kubernetes)
  return 2, timestamp, record
end
function dedot_and_enrich_app_name(tag, timestamp, record)
  if record.kubernetes == nil then
    return 0
  end
  enrich_app_name_internal(record.kubernetes)
  map_keys(record.kubernetes.annotations)
  map_keys(record.kubernetes.labels)
  return 2, timestamp, record
end
function enrich_app_name_internal(table)
  if table.labels == nil then
    return 0
  end
  table["app_name"] = table.labels["app.kubernetes.io/name"] or table.labels["app"]
end
function map_keys(table)
  if table == nil then
    return
  end
  local new_table = {}
  local changed_keys = {}
  for key, val in pairs(table) do
    local mapped_key = string.gsub(key, "[%/%.]", "_")
    if mapped_key ~= key then
      new_table[mapped_key] = val
      changed_keys[key] = true
    end
  end
  for key in pairs(changed_keys) do
    table[key] = nil
  end
  for key, val in pairs(new_table) do
    table[key] = val
  end
end
"#;

// =============================================================================
// Object kinds
// =============================================================================

/// Kinds of objects making up the agent
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgentKind {
    /// ServiceAccount of the agent pods
    ServiceAccount,
    /// Read access to pods and namespaces
    ClusterRole,
    /// Binds the ClusterRole to the ServiceAccount
    ClusterRoleBinding,
    /// Metrics services
    Service,
    /// Configuration ConfigMaps
    ConfigMap,
    /// Env and TLS Secrets
    Secret,
    /// The agent itself
    DaemonSet,
    /// Ingress rules for the metrics ports
    NetworkPolicy,
}

impl AgentKind {
    /// API resource for dynamic access
    pub fn api_resource(self) -> ApiResource {
        match self {
            Self::ServiceAccount => ApiResource::erase::<ServiceAccount>(&()),
            Self::ClusterRole => ApiResource::erase::<ClusterRole>(&()),
            Self::ClusterRoleBinding => ApiResource::erase::<ClusterRoleBinding>(&()),
            Self::Service => ApiResource::erase::<Service>(&()),
            Self::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            Self::Secret => ApiResource::erase::<Secret>(&()),
            Self::DaemonSet => ApiResource::erase::<DaemonSet>(&()),
            Self::NetworkPolicy => ApiResource::erase::<NetworkPolicy>(&()),
        }
    }

    /// False for the cluster-scoped RBAC kinds
    pub fn is_namespaced(self) -> bool {
        !matches!(self, Self::ClusterRole | Self::ClusterRoleBinding)
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ServiceAccount => "ServiceAccount",
            Self::ClusterRole => "ClusterRole",
            Self::ClusterRoleBinding => "ClusterRoleBinding",
            Self::Service => "Service",
            Self::ConfigMap => "ConfigMap",
            Self::Secret => "Secret",
            Self::DaemonSet => "DaemonSet",
            Self::NetworkPolicy => "NetworkPolicy",
        };
        f.write_str(s)
    }
}

/// One agent object, ready to be applied
#[derive(Clone, Debug, PartialEq)]
pub enum AgentResource {
    /// ServiceAccount
    ServiceAccount(ServiceAccount),
    /// ClusterRole
    ClusterRole(ClusterRole),
    /// ClusterRoleBinding
    ClusterRoleBinding(ClusterRoleBinding),
    /// Service
    Service(Service),
    /// ConfigMap
    ConfigMap(ConfigMap),
    /// Secret
    Secret(Secret),
    /// DaemonSet
    DaemonSet(DaemonSet),
    /// NetworkPolicy
    NetworkPolicy(NetworkPolicy),
}

impl AgentResource {
    /// Kind of the wrapped object
    pub fn kind(&self) -> AgentKind {
        match self {
            Self::ServiceAccount(_) => AgentKind::ServiceAccount,
            Self::ClusterRole(_) => AgentKind::ClusterRole,
            Self::ClusterRoleBinding(_) => AgentKind::ClusterRoleBinding,
            Self::Service(_) => AgentKind::Service,
            Self::ConfigMap(_) => AgentKind::ConfigMap,
            Self::Secret(_) => AgentKind::Secret,
            Self::DaemonSet(_) => AgentKind::DaemonSet,
            Self::NetworkPolicy(_) => AgentKind::NetworkPolicy,
        }
    }

    fn metadata(&self) -> &ObjectMeta {
        match self {
            Self::ServiceAccount(o) => &o.metadata,
            Self::ClusterRole(o) => &o.metadata,
            Self::ClusterRoleBinding(o) => &o.metadata,
            Self::Service(o) => &o.metadata,
            Self::ConfigMap(o) => &o.metadata,
            Self::Secret(o) => &o.metadata,
            Self::DaemonSet(o) => &o.metadata,
            Self::NetworkPolicy(o) => &o.metadata,
        }
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Object namespace, empty for cluster-scoped kinds
    pub fn namespace(&self) -> &str {
        self.metadata().namespace.as_deref().unwrap_or_default()
    }

    /// Serialized form including `apiVersion` and `kind`
    pub fn to_json(&self) -> Result<serde_json::Value, Error> {
        let value = match self {
            Self::ServiceAccount(o) => serde_json::to_value(o),
            Self::ClusterRole(o) => serde_json::to_value(o),
            Self::ClusterRoleBinding(o) => serde_json::to_value(o),
            Self::Service(o) => serde_json::to_value(o),
            Self::ConfigMap(o) => serde_json::to_value(o),
            Self::Secret(o) => serde_json::to_value(o),
            Self::DaemonSet(o) => serde_json::to_value(o),
            Self::NetworkPolicy(o) => serde_json::to_value(o),
        };
        value.map_err(|e| Error::serialization_for_kind(self.kind().to_string(), e.to_string()))
    }
}

// =============================================================================
// Labels and metadata
// =============================================================================

/// Labels selecting the agent pods
pub fn selector_labels(config: &ReconcilerConfig) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_NAME.to_string(), config.names.daemon_set.clone()),
        (LABEL_INSTANCE.to_string(), "telemetry".to_string()),
    ])
}

/// Label selector string for listing the agent pods
pub fn selector_string(config: &ReconcilerConfig) -> String {
    selector_labels(config)
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

fn meta(config: &ReconcilerConfig, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(config.namespace.clone()),
        labels: Some(standard_labels(&config.names.daemon_set)),
        ..Default::default()
    }
}

fn cluster_meta(config: &ReconcilerConfig, name: &str) -> ObjectMeta {
    ObjectMeta {
        namespace: None,
        ..meta(config, name)
    }
}

// =============================================================================
// RBAC
// =============================================================================

/// ServiceAccount of the agent pods
pub fn service_account(config: &ReconcilerConfig) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(config, &config.names.daemon_set),
        ..Default::default()
    }
}

/// Read access to pods and namespaces for the kubernetes filter
pub fn cluster_role(config: &ReconcilerConfig) -> ClusterRole {
    ClusterRole {
        metadata: cluster_meta(config, &config.names.daemon_set),
        rules: Some(vec![PolicyRule {
            api_groups: Some(vec![String::new()]),
            resources: Some(vec!["namespaces".to_string(), "pods".to_string()]),
            verbs: vec!["get".to_string(), "list".to_string(), "watch".to_string()],
            ..Default::default()
        }]),
        ..Default::default()
    }
}

/// Binds [`cluster_role`] to [`service_account`]
pub fn cluster_role_binding(config: &ReconcilerConfig) -> ClusterRoleBinding {
    let name = &config.names.daemon_set;
    ClusterRoleBinding {
        metadata: cluster_meta(config, name),
        role_ref: RoleRef {
            api_group: "rbac.authorization.k8s.io".to_string(),
            kind: "ClusterRole".to_string(),
            name: name.clone(),
        },
        subjects: Some(vec![Subject {
            kind: "ServiceAccount".to_string(),
            name: name.clone(),
            namespace: Some(config.namespace.clone()),
            ..Default::default()
        }]),
    }
}

// =============================================================================
// Services
// =============================================================================

fn scrape_annotations(port: i32, path: Option<&str>) -> BTreeMap<String, String> {
    let mut annotations = BTreeMap::from([
        ("prometheus.io/scrape".to_string(), "true".to_string()),
        ("prometheus.io/port".to_string(), port.to_string()),
        ("prometheus.io/scheme".to_string(), "http".to_string()),
    ]);
    if let Some(path) = path {
        annotations.insert("prometheus.io/path".to_string(), path.to_string());
    }
    annotations
}

fn metrics_service_for(
    config: &ReconcilerConfig,
    name: &str,
    port_name: &str,
    port: i32,
    path: Option<&str>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            annotations: Some(scrape_annotations(port, path)),
            ..meta(config, name)
        },
        spec: Some(ServiceSpec {
            ports: Some(vec![ServicePort {
                name: Some(port_name.to_string()),
                protocol: Some("TCP".to_string()),
                port,
                target_port: Some(IntOrString::String(port_name.to_string())),
                ..Default::default()
            }]),
            selector: Some(selector_labels(config)),
            type_: Some("ClusterIP".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Service exposing Fluent Bit's own Prometheus metrics
pub fn metrics_service(config: &ReconcilerConfig) -> Service {
    metrics_service_for(
        config,
        &config.names.metrics_service,
        "http",
        FLUENT_BIT_HTTP_PORT,
        Some(PROMETHEUS_METRICS_PATH),
    )
}

/// Service exposing the filesystem-buffer exporter
pub fn exporter_metrics_service(config: &ReconcilerConfig) -> Service {
    metrics_service_for(
        config,
        &config.names.exporter_metrics_service,
        "http-metrics",
        FLUENT_BIT_EXPORTER_METRICS_PORT,
        None,
    )
}

// =============================================================================
// Configuration artifacts
// =============================================================================

fn config_map(config: &ReconcilerConfig, name: &str, data: BTreeMap<String, String>) -> ConfigMap {
    ConfigMap {
        metadata: meta(config, name),
        data: Some(data),
        ..Default::default()
    }
}

fn secret(config: &ReconcilerConfig, name: &str, data: &BTreeMap<String, Vec<u8>>) -> Secret {
    Secret {
        metadata: meta(config, name),
        data: Some(
            data.iter()
                .map(|(k, v)| (k.clone(), ByteString(v.clone())))
                .collect(),
        ),
        ..Default::default()
    }
}

/// `[SERVICE]` configuration and the parsers include
pub fn base_config_map(config: &ReconcilerConfig) -> ConfigMap {
    config_map(
        config,
        &config.names.daemon_set,
        BTreeMap::from([
            (FLUENT_BIT_CONF_KEY.to_string(), BASE_CONFIG.to_string()),
            (CUSTOM_PARSERS_KEY.to_string(), CUSTOM_PARSERS_CONFIG.to_string()),
        ]),
    )
}

/// Lua enrichment script
pub fn lua_config_map(config: &ReconcilerConfig) -> ConfigMap {
    config_map(
        config,
        &config.names.lua_config_map,
        BTreeMap::from([(LUA_SCRIPT_KEY.to_string(), LUA_FILTER_SCRIPT.to_string())]),
    )
}

/// User parsers; only created when missing, never overwritten
pub fn parsers_config_map(config: &ReconcilerConfig) -> ConfigMap {
    config_map(
        config,
        &config.names.parsers_config_map,
        BTreeMap::from([(PARSERS_KEY.to_string(), String::new())]),
    )
}

/// Rendered sections, one `<pipeline>.conf` key per pipeline
pub fn sections_config_map(
    config: &ReconcilerConfig,
    sections: &BTreeMap<String, String>,
) -> ConfigMap {
    config_map(config, &config.names.sections_config_map, sections.clone())
}

/// Files from pipeline specs, mounted at `/files`
pub fn files_config_map(config: &ReconcilerConfig, files: &BTreeMap<String, String>) -> ConfigMap {
    config_map(config, &config.names.files_config_map, files.clone())
}

/// Secret values exposed as agent environment
pub fn env_config_secret(config: &ReconcilerConfig, env: &BTreeMap<String, Vec<u8>>) -> Secret {
    secret(config, &config.names.env_config_secret, env)
}

/// TLS material mounted under the output TLS directory
pub fn tls_file_config_secret(
    config: &ReconcilerConfig,
    tls: &BTreeMap<String, Vec<u8>>,
) -> Secret {
    secret(config, &config.names.tls_file_config_secret, tls)
}

/// SHA-256 over every configuration input, in argument order.
///
/// ConfigMaps are hashed before Secrets; keys within one object in
/// ascending order. Every object, key and value is length-prefixed so bytes
/// moving across a boundary change the digest.
pub fn config_checksum(config_maps: &[&ConfigMap], secrets: &[&Secret]) -> String {
    let mut ctx = digest::Context::new(&digest::SHA256);
    let mut framed = |bytes: &[u8]| {
        ctx.update(&(bytes.len() as u64).to_le_bytes());
        ctx.update(bytes);
    };
    for cm in config_maps {
        let data = cm.data.as_ref();
        framed(&(data.map_or(0, BTreeMap::len) as u64).to_le_bytes());
        for (key, value) in data.into_iter().flatten() {
            framed(key.as_bytes());
            framed(value.as_bytes());
        }
    }
    for secret in secrets {
        let data = secret.data.as_ref();
        framed(&(data.map_or(0, BTreeMap::len) as u64).to_le_bytes());
        for (key, value) in data.into_iter().flatten() {
            framed(key.as_bytes());
            framed(&value.0);
        }
    }
    ctx.finish()
        .as_ref()
        .iter()
        .fold(String::with_capacity(64), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

// =============================================================================
// Workload
// =============================================================================

/// The agent DaemonSet; `checksum` lands on the pod template
pub fn daemon_set(config: &ReconcilerConfig, checksum: &str) -> Result<DaemonSet, Error> {
    let names = &config.names;
    let mut pod_labels = standard_labels(&names.daemon_set);
    pod_labels.extend(selector_labels(config));
    pod_labels.insert(LABEL_ISTIO_INJECT.to_string(), "true".to_string());

    let pod_annotations = BTreeMap::from([
        (ANNOTATION_CHECKSUM_CONFIG.to_string(), checksum.to_string()),
        (
            ANNOTATION_ISTIO_EXCLUDE_INBOUND_PORTS.to_string(),
            format!("{},{}", FLUENT_BIT_HTTP_PORT, FLUENT_BIT_EXPORTER_METRICS_PORT),
        ),
    ]);

    let priority_class = (!config.priority_class_name.is_empty())
        .then(|| config.priority_class_name.clone());

    let ds = json!({
        "apiVersion": "apps/v1",
        "kind": "DaemonSet",
        "metadata": meta(config, &names.daemon_set),
        "spec": {
            "selector": { "matchLabels": selector_labels(config) },
            "template": {
                "metadata": { "labels": pod_labels, "annotations": pod_annotations },
                "spec": {
                    "serviceAccountName": names.daemon_set,
                    "priorityClassName": priority_class,
                    "securityContext": {
                        "runAsNonRoot": true,
                        "seccompProfile": { "type": "RuntimeDefault" }
                    },
                    "tolerations": [
                        { "effect": "NoExecute", "operator": "Exists" },
                        { "effect": "NoSchedule", "operator": "Exists" }
                    ],
                    "initContainers": [{
                        "name": "checkpoint-dir-ownership-modifier",
                        "image": config.images.chown_init,
                        "command": ["chown", "-R", format!("{}:{}", FLUENT_BIT_USER, ROOT_GROUP), "/data"],
                        "securityContext": {
                            "runAsNonRoot": false,
                            "runAsUser": 0,
                            "capabilities": { "drop": ["ALL"], "add": ["CHOWN"] }
                        },
                        "resources": {
                            "limits": { "memory": "50Mi" },
                            "requests": { "cpu": "10m", "memory": "10Mi" }
                        },
                        "volumeMounts": [{ "name": "varfluentbit", "mountPath": "/data" }]
                    }],
                    "containers": [
                        {
                            "name": "fluent-bit",
                            "image": config.images.fluent_bit,
                            "envFrom": [{ "secretRef": { "name": names.env_config_secret, "optional": true } }],
                            "ports": [{ "name": "http", "containerPort": FLUENT_BIT_HTTP_PORT, "protocol": "TCP" }],
                            "livenessProbe": { "httpGet": { "path": "/", "port": "http" } },
                            "readinessProbe": { "httpGet": { "path": "/api/v1/health", "port": "http" } },
                            "securityContext": {
                                "runAsUser": FLUENT_BIT_USER,
                                "runAsGroup": ROOT_GROUP,
                                "privileged": false,
                                "allowPrivilegeEscalation": false,
                                "readOnlyRootFilesystem": true,
                                "capabilities": { "drop": ["ALL"] }
                            },
                            "resources": {
                                "limits": { "memory": "1Gi" },
                                "requests": { "cpu": "100m", "memory": "50Mi" }
                            },
                            "volumeMounts": [
                                { "name": "shared-fluent-bit-config", "mountPath": "/fluent-bit/etc" },
                                { "name": "config", "mountPath": "/fluent-bit/etc/fluent-bit.conf", "subPath": FLUENT_BIT_CONF_KEY },
                                { "name": "dynamic-config", "mountPath": "/fluent-bit/etc/dynamic/" },
                                { "name": "dynamic-parsers-config", "mountPath": "/fluent-bit/etc/dynamic-parsers/" },
                                { "name": "config", "mountPath": "/fluent-bit/etc/custom_parsers.conf", "subPath": CUSTOM_PARSERS_KEY },
                                { "name": "luascripts", "mountPath": telemetry_fluentbit::LUA_SCRIPT_PATH, "subPath": LUA_SCRIPT_KEY },
                                { "name": "varlog", "mountPath": "/var/log", "readOnly": true },
                                { "name": "varfluentbit", "mountPath": "/data" },
                                { "name": "dynamic-files", "mountPath": "/files" },
                                { "name": "output-tls-config", "mountPath": format!("{}/", telemetry_fluentbit::OUTPUT_TLS_CONFIG_DIR), "readOnly": true }
                            ]
                        },
                        {
                            "name": "exporter",
                            "image": config.images.exporter,
                            "args": [
                                format!("--storage-path={}", STORAGE_PATH),
                                "--metric-name=telemetry_fsbuffer_usage_bytes"
                            ],
                            "ports": [{ "name": "http-metrics", "containerPort": FLUENT_BIT_EXPORTER_METRICS_PORT, "protocol": "TCP" }],
                            "securityContext": {
                                "runAsUser": FLUENT_BIT_USER,
                                "privileged": false,
                                "allowPrivilegeEscalation": false,
                                "readOnlyRootFilesystem": true,
                                "capabilities": { "drop": ["ALL"] }
                            },
                            "resources": {
                                "limits": { "memory": "50Mi" },
                                "requests": { "cpu": "1m", "memory": "5Mi" }
                            },
                            "volumeMounts": [{ "name": "varfluentbit", "mountPath": "/data" }]
                        }
                    ],
                    "volumes": [
                        { "name": "config", "configMap": { "name": names.daemon_set } },
                        { "name": "luascripts", "configMap": { "name": names.lua_config_map } },
                        { "name": "varlog", "hostPath": { "path": "/var/log" } },
                        { "name": "shared-fluent-bit-config", "emptyDir": {} },
                        { "name": "dynamic-config", "configMap": { "name": names.sections_config_map, "optional": true } },
                        { "name": "dynamic-parsers-config", "configMap": { "name": names.parsers_config_map, "optional": true } },
                        { "name": "dynamic-files", "configMap": { "name": names.files_config_map, "optional": true } },
                        { "name": "varfluentbit", "hostPath": { "path": "/var/telemetry-fluent-bit" } },
                        { "name": "output-tls-config", "secret": { "secretName": names.tls_file_config_secret } }
                    ]
                }
            }
        }
    });

    serde_json::from_value(ds).map_err(|e| Error::serialization_for_kind("DaemonSet", e.to_string()))
}

/// Ingress from anywhere on `ports` (TCP) to the agent pods
pub fn network_policy(config: &ReconcilerConfig, ports: &[i32]) -> Result<NetworkPolicy, Error> {
    let ports: Vec<_> = ports
        .iter()
        .map(|p| json!({ "protocol": "TCP", "port": p }))
        .collect();
    let np = json!({
        "apiVersion": "networking.k8s.io/v1",
        "kind": "NetworkPolicy",
        "metadata": meta(config, &config.names.daemon_set),
        "spec": {
            "podSelector": { "matchLabels": selector_labels(config) },
            "policyTypes": ["Ingress"],
            "ingress": [{
                "from": [
                    { "ipBlock": { "cidr": "0.0.0.0/0" } },
                    { "ipBlock": { "cidr": "::/0" } }
                ],
                "ports": ports
            }]
        }
    });

    serde_json::from_value(np)
        .map_err(|e| Error::serialization_for_kind("NetworkPolicy", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconcilerConfig {
        ReconcilerConfig::default()
    }

    fn container<'a>(ds: &'a DaemonSet, name: &str) -> &'a k8s_openapi::api::core::v1::Container {
        ds.spec
            .as_ref()
            .unwrap()
            .template
            .spec
            .as_ref()
            .unwrap()
            .containers
            .iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    // =========================================================================
    // DaemonSet
    // =========================================================================

    #[test]
    fn daemon_set_carries_checksum_and_istio_annotations() {
        let ds = daemon_set(&config(), "abc123").unwrap();
        let template = &ds.spec.as_ref().unwrap().template;
        let annotations = template.metadata.as_ref().unwrap().annotations.as_ref().unwrap();
        assert_eq!(annotations[ANNOTATION_CHECKSUM_CONFIG], "abc123");
        assert_eq!(annotations[ANNOTATION_ISTIO_EXCLUDE_INBOUND_PORTS], "2020,2021");

        let labels = template.metadata.as_ref().unwrap().labels.as_ref().unwrap();
        assert_eq!(labels[LABEL_ISTIO_INJECT], "true");
        assert_eq!(labels[LABEL_NAME], "telemetry-fluent-bit");
    }

    #[test]
    fn fluent_bit_container_reads_env_secret_and_probes_http() {
        let ds = daemon_set(&config(), "x").unwrap();
        let fb = container(&ds, "fluent-bit");

        let env_from = serde_json::to_value(fb.env_from.as_ref().unwrap()).unwrap();
        assert_eq!(env_from[0]["secretRef"]["name"], "telemetry-fluent-bit-env");
        let readiness = fb.readiness_probe.as_ref().unwrap().http_get.as_ref().unwrap();
        assert_eq!(readiness.path.as_deref(), Some("/api/v1/health"));
        assert_eq!(readiness.port, IntOrString::String("http".to_string()));

        let mounts = fb.volume_mounts.as_ref().unwrap();
        assert!(mounts.iter().any(|m| m.mount_path == "/fluent-bit/etc/dynamic/"));
        assert!(mounts
            .iter()
            .any(|m| m.mount_path == "/var/log" && m.read_only == Some(true)));
        assert!(mounts
            .iter()
            .any(|m| m.mount_path == "/fluent-bit/scripts/filter-script.lua"));
    }

    #[test]
    fn exporter_sidecar_watches_storage_path() {
        let ds = daemon_set(&config(), "x").unwrap();
        let exporter = container(&ds, "exporter");
        let args = exporter.args.as_ref().unwrap();
        assert_eq!(args[0], "--storage-path=/data/flb-storage/");
        assert_eq!(args[1], "--metric-name=telemetry_fsbuffer_usage_bytes");
        assert_eq!(exporter.ports.as_ref().unwrap()[0].container_port, 2021);
    }

    #[test]
    fn priority_class_is_optional() {
        let ds = daemon_set(&config(), "x").unwrap();
        let spec = ds.spec.unwrap().template.spec.unwrap();
        assert!(spec.priority_class_name.is_none());

        let mut cfg = config();
        cfg.priority_class_name = "telemetry-priority".to_string();
        let spec = daemon_set(&cfg, "x").unwrap().spec.unwrap().template.spec.unwrap();
        assert_eq!(spec.priority_class_name.as_deref(), Some("telemetry-priority"));
    }

    // =========================================================================
    // Checksum
    // =========================================================================

    #[test]
    fn checksum_is_stable_and_input_sensitive() {
        let cfg = config();
        let base = base_config_map(&cfg);
        let mut sections = BTreeMap::from([("foo.conf".to_string(), "[INPUT]\n".to_string())]);
        let env = env_config_secret(&cfg, &BTreeMap::new());

        let first = config_checksum(&[&base, &sections_config_map(&cfg, &sections)], &[&env]);
        let again = config_checksum(&[&base, &sections_config_map(&cfg, &sections)], &[&env]);
        assert_eq!(first, again);
        assert_eq!(first.len(), 64);

        sections.insert("bar.conf".to_string(), "[INPUT]\n".to_string());
        let changed = config_checksum(&[&base, &sections_config_map(&cfg, &sections)], &[&env]);
        assert_ne!(first, changed);
    }

    fn all_inputs(cfg: &ReconcilerConfig) -> (Vec<ConfigMap>, Vec<Secret>) {
        let config_maps = vec![
            base_config_map(cfg),
            parsers_config_map(cfg),
            lua_config_map(cfg),
            sections_config_map(
                cfg,
                &BTreeMap::from([("foo.conf".to_string(), "[INPUT]\n".to_string())]),
            ),
            files_config_map(cfg, &BTreeMap::from([("a.json".to_string(), "{}".to_string())])),
        ];
        let secrets = vec![
            env_config_secret(cfg, &BTreeMap::from([("FOO_NS_S_K".to_string(), b"x".to_vec())])),
            tls_file_config_secret(cfg, &BTreeMap::from([("foo-ca.crt".to_string(), b"ca".to_vec())])),
        ];
        (config_maps, secrets)
    }

    fn checksum_of(config_maps: &[ConfigMap], secrets: &[Secret]) -> String {
        let cms: Vec<&ConfigMap> = config_maps.iter().collect();
        let secrets: Vec<&Secret> = secrets.iter().collect();
        config_checksum(&cms, &secrets)
    }

    #[test]
    fn every_input_changes_checksum() {
        let cfg = config();
        let (config_maps, secrets) = all_inputs(&cfg);
        let baseline = checksum_of(&config_maps, &secrets);

        for i in 0..config_maps.len() {
            let mut changed = config_maps.clone();
            changed[i]
                .data
                .get_or_insert_with(Default::default)
                .insert("extra".to_string(), "value".to_string());
            assert_ne!(checksum_of(&changed, &secrets), baseline, "config map {i}");
        }
        for i in 0..secrets.len() {
            let mut changed = secrets.clone();
            changed[i]
                .data
                .get_or_insert_with(Default::default)
                .insert("extra".to_string(), ByteString(b"value".to_vec()));
            assert_ne!(checksum_of(&config_maps, &changed), baseline, "secret {i}");
        }
    }

    #[test]
    fn bytes_moving_between_key_and_value_change_checksum() {
        let cfg = config();
        let split = |key: &str, value: &str| {
            let files = files_config_map(&cfg, &BTreeMap::from([(key.to_string(), value.to_string())]));
            config_checksum(&[&files], &[])
        };
        assert_ne!(split("ab", "c"), split("a", "bc"));
    }

    #[test]
    fn bytes_moving_between_objects_change_checksum() {
        let cfg = config();
        let files = |entries: &[(&str, &str)]| {
            files_config_map(
                &cfg,
                &entries.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            )
        };
        let left = files(&[("a", "1"), ("b", "2")]);
        let right = files(&[]);
        let moved_left = files(&[("a", "1")]);
        let moved_right = files(&[("b", "2")]);
        assert_ne!(
            config_checksum(&[&left, &right], &[]),
            config_checksum(&[&moved_left, &moved_right], &[])
        );
    }

    // =========================================================================
    // Supporting objects
    // =========================================================================

    #[test]
    fn rbac_is_cluster_scoped_read_only() {
        let cfg = config();
        let role = cluster_role(&cfg);
        assert!(role.metadata.namespace.is_none());
        let rule = &role.rules.unwrap()[0];
        assert_eq!(rule.verbs, vec!["get", "list", "watch"]);

        let binding = cluster_role_binding(&cfg);
        let subject = &binding.subjects.unwrap()[0];
        assert_eq!(subject.namespace.as_deref(), Some("kyma-system"));
        assert_eq!(binding.role_ref.name, "telemetry-fluent-bit");
    }

    #[test]
    fn metrics_services_expose_scrape_annotations() {
        let cfg = config();
        let svc = metrics_service(&cfg);
        let annotations = svc.metadata.annotations.unwrap();
        assert_eq!(annotations["prometheus.io/path"], "/api/v2/metrics/prometheus");
        assert_eq!(svc.spec.unwrap().ports.unwrap()[0].port, 2020);

        let exporter = exporter_metrics_service(&cfg);
        let annotations = exporter.metadata.annotations.unwrap();
        assert!(!annotations.contains_key("prometheus.io/path"));
        assert_eq!(annotations["prometheus.io/port"], "2021");
    }

    #[test]
    fn network_policy_opens_requested_ports() {
        let np = network_policy(&config(), &[2020, 2021, 15090]).unwrap();
        let json = serde_json::to_value(&np).unwrap();
        let ports = json["spec"]["ingress"][0]["ports"].as_array().unwrap();
        assert_eq!(ports.len(), 3);
        assert_eq!(ports[2]["port"], 15090);
        assert_eq!(json["spec"]["ingress"][0]["from"][1]["ipBlock"]["cidr"], "::/0");
    }

    #[test]
    fn base_config_includes_dynamic_sections() {
        let cm = base_config_map(&config());
        let conf = &cm.data.unwrap()[FLUENT_BIT_CONF_KEY];
        assert!(conf.contains("@INCLUDE dynamic/*.conf"));
        assert!(conf.contains("    HTTP_Port 2020\n"));
        assert!(conf.contains("    storage.path /data/flb-storage/\n"));
    }

    #[test]
    fn agent_resource_reports_kind_and_scope() {
        let cfg = config();
        let role = AgentResource::ClusterRole(cluster_role(&cfg));
        assert_eq!(role.kind(), AgentKind::ClusterRole);
        assert!(!role.kind().is_namespaced());
        assert_eq!(role.namespace(), "");

        let cm = AgentResource::ConfigMap(lua_config_map(&cfg));
        assert_eq!(cm.name(), "telemetry-fluent-bit-luascripts");
        assert_eq!(cm.to_json().unwrap()["kind"], "ConfigMap");
    }
}
