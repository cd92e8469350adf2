//! Converging the shared Fluent Bit agent
//!
//! The sections, files and both secrets are shared by every pipeline. They
//! are rebuilt from scratch as the union over the admitted pipelines and
//! applied whole, so the keys of a pipeline that dropped out vanish without
//! a per-pipeline diff.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use telemetry_common::crd::LogPipeline;
use telemetry_common::{
    Error, FLUENT_BIT_EXPORTER_METRICS_PORT, FLUENT_BIT_HTTP_PORT, ISTIO_ENVOY_PORT,
};
use telemetry_fluentbit::{render_pipeline, sections_key, RenderConfig};

use crate::client::LogPipelineKubeClient;
use crate::config::ReconcilerConfig;
use crate::resources::{self, AgentKind, AgentResource};
use crate::secrets::ProjectedSecrets;

/// Contents of the four shared agent artifacts
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentBundle {
    /// `<pipeline>.conf` to rendered sections
    pub sections: BTreeMap<String, String>,
    /// File name to content
    pub files: BTreeMap<String, String>,
    /// Env secret data
    pub env: BTreeMap<String, Vec<u8>>,
    /// TLS secret data
    pub tls: BTreeMap<String, Vec<u8>>,
}

impl AgentBundle {
    /// Render `pipelines` and merge in their projected secrets.
    ///
    /// A pipeline that fails to render is left out with a warning; the
    /// others still ship.
    pub fn build(
        pipelines: &[&LogPipeline],
        render: &RenderConfig,
        secrets: ProjectedSecrets,
    ) -> Self {
        let mut bundle = Self {
            env: secrets.env,
            tls: secrets.tls,
            ..Default::default()
        };

        for pipeline in pipelines {
            let name = pipeline.metadata.name.as_deref().unwrap_or_default();
            match render_pipeline(name, &pipeline.spec, render) {
                Ok(text) => {
                    bundle.sections.insert(sections_key(name), text);
                }
                Err(e) => {
                    warn!(pipeline = %name, error = %e, "skipping pipeline that failed to render");
                    continue;
                }
            }
            for file in &pipeline.spec.files {
                bundle.files.insert(file.name.clone(), file.content.clone());
            }
        }
        bundle
    }
}

/// TCP ports the agent NetworkPolicy opens
pub fn allowed_ports(istio_active: bool) -> Vec<i32> {
    let mut ports = vec![FLUENT_BIT_HTTP_PORT, FLUENT_BIT_EXPORTER_METRICS_PORT];
    if istio_active {
        ports.push(ISTIO_ENVOY_PORT);
    }
    ports
}

/// Apply every agent object in dependency order.
///
/// The DaemonSet goes last but one so its checksum covers the committed
/// configuration; the parsers ConfigMap is only created when missing and its
/// live content feeds the checksum.
pub async fn apply_agent(
    kube: &dyn LogPipelineKubeClient,
    config: &ReconcilerConfig,
    bundle: &AgentBundle,
    istio_active: bool,
) -> Result<(), Error> {
    let base = resources::base_config_map(config);
    let lua = resources::lua_config_map(config);
    let sections = resources::sections_config_map(config, &bundle.sections);
    let files = resources::files_config_map(config, &bundle.files);
    let env = resources::env_config_secret(config, &bundle.env);
    let tls = resources::tls_file_config_secret(config, &bundle.tls);

    for resource in [
        AgentResource::ServiceAccount(resources::service_account(config)),
        AgentResource::ClusterRole(resources::cluster_role(config)),
        AgentResource::ClusterRoleBinding(resources::cluster_role_binding(config)),
        AgentResource::Service(resources::metrics_service(config)),
        AgentResource::Service(resources::exporter_metrics_service(config)),
        AgentResource::ConfigMap(base.clone()),
        AgentResource::ConfigMap(lua.clone()),
    ] {
        kube.apply(&resource).await?;
    }

    let parsers = resources::parsers_config_map(config);
    if kube
        .create_if_absent(&AgentResource::ConfigMap(parsers.clone()))
        .await?
    {
        info!(name = %config.names.parsers_config_map, "created parsers ConfigMap");
    }
    let parsers = kube
        .get_config_map(&config.namespace, &config.names.parsers_config_map)
        .await?
        .unwrap_or(parsers);

    for resource in [
        AgentResource::ConfigMap(sections.clone()),
        AgentResource::ConfigMap(files.clone()),
        AgentResource::Secret(env.clone()),
        AgentResource::Secret(tls.clone()),
    ] {
        kube.apply(&resource).await?;
    }

    let checksum =
        resources::config_checksum(&[&base, &parsers, &lua, &sections, &files], &[&env, &tls]);
    kube.apply(&AgentResource::DaemonSet(resources::daemon_set(config, &checksum)?))
        .await?;

    let policy = resources::network_policy(config, &allowed_ports(istio_active))?;
    kube.apply(&AgentResource::NetworkPolicy(policy)).await?;

    debug!(
        pipelines = bundle.sections.len(),
        checksum = %checksum,
        "agent applied"
    );
    Ok(())
}

/// Every agent object except the parsers ConfigMap, DaemonSet first
fn owned_objects(config: &ReconcilerConfig) -> Vec<(AgentKind, &str)> {
    let names = &config.names;
    vec![
        (AgentKind::DaemonSet, names.daemon_set.as_str()),
        (AgentKind::NetworkPolicy, names.daemon_set.as_str()),
        (AgentKind::Secret, names.env_config_secret.as_str()),
        (AgentKind::Secret, names.tls_file_config_secret.as_str()),
        (AgentKind::ConfigMap, names.sections_config_map.as_str()),
        (AgentKind::ConfigMap, names.files_config_map.as_str()),
        (AgentKind::ConfigMap, names.lua_config_map.as_str()),
        (AgentKind::ConfigMap, names.daemon_set.as_str()),
        (AgentKind::Service, names.metrics_service.as_str()),
        (AgentKind::Service, names.exporter_metrics_service.as_str()),
        (AgentKind::ClusterRoleBinding, names.daemon_set.as_str()),
        (AgentKind::ClusterRole, names.daemon_set.as_str()),
        (AgentKind::ServiceAccount, names.daemon_set.as_str()),
    ]
}

/// Withdraw the agent. Every deletion is attempted; failures are joined.
pub async fn delete_agent(
    kube: &dyn LogPipelineKubeClient,
    config: &ReconcilerConfig,
) -> Result<(), Error> {
    let mut errors = Vec::new();
    for (kind, name) in owned_objects(config) {
        if let Err(e) = kube.delete(kind, &config.namespace, name).await {
            warn!(kind = %kind, name = %name, error = %e, "failed to delete agent object");
            errors.push(e);
        }
    }
    match Error::join(errors) {
        Some(e) => Err(e),
        None => {
            info!("agent withdrawn, no pipeline is reconcilable");
            Ok(())
        }
    }
}
