//! Cluster name stamped on every record
//!
//! Resolved per agent rollout: the Telemetry resource's cluster enrichment
//! wins, then the Gardener shoot name, then the configured default. Lookup
//! failures fall through to the next source.

use kube::api::DynamicObject;
use tracing::debug;

use crate::client::LogPipelineKubeClient;
use crate::config::ReconcilerConfig;

/// Name of the Telemetry resource in the telemetry namespace
pub const DEFAULT_TELEMETRY_NAME: &str = "default";
/// Namespace of the Gardener shoot info ConfigMap
pub const SHOOT_INFO_NAMESPACE: &str = "kube-system";
/// Gardener shoot info ConfigMap
pub const SHOOT_INFO_CONFIG_MAP: &str = "shoot-info";
/// Key of the shoot name in [`SHOOT_INFO_CONFIG_MAP`]
pub const SHOOT_NAME_KEY: &str = "shootName";

/// `spec.enrichments.cluster.name` of a Telemetry resource, if set
pub fn enrichment_cluster_name(telemetry: &DynamicObject) -> Option<String> {
    telemetry
        .data
        .pointer("/spec/enrichments/cluster/name")
        .and_then(serde_json::Value::as_str)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

async fn from_telemetry(kube: &dyn LogPipelineKubeClient, namespace: &str) -> Option<String> {
    match kube.get_telemetry(namespace, DEFAULT_TELEMETRY_NAME).await {
        Ok(telemetry) => telemetry.as_ref().and_then(enrichment_cluster_name),
        Err(e) => {
            debug!(error = %e, "failed to read Telemetry resource");
            None
        }
    }
}

async fn from_shoot_info(kube: &dyn LogPipelineKubeClient) -> Option<String> {
    match kube
        .get_config_map(SHOOT_INFO_NAMESPACE, SHOOT_INFO_CONFIG_MAP)
        .await
    {
        Ok(cm) => cm
            .and_then(|cm| cm.data)
            .and_then(|mut data| data.remove(SHOOT_NAME_KEY))
            .filter(|name| !name.is_empty()),
        Err(e) => {
            debug!(error = %e, "failed to read shoot info");
            None
        }
    }
}

/// Cluster name for the next render
pub async fn resolve_cluster_name(
    kube: &dyn LogPipelineKubeClient,
    config: &ReconcilerConfig,
) -> String {
    if let Some(name) = from_telemetry(kube, &config.namespace).await {
        return name;
    }
    if let Some(name) = from_shoot_info(kube).await {
        return name;
    }
    config.render.cluster_name.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockLogPipelineKubeClient;
    use k8s_openapi::api::core::v1::ConfigMap;
    use telemetry_common::Error;

    fn telemetry(cluster_name: &str) -> DynamicObject {
        DynamicObject {
            types: None,
            metadata: Default::default(),
            data: serde_json::json!({
                "spec": { "enrichments": { "cluster": { "name": cluster_name } } }
            }),
        }
    }

    fn shoot_info(name: &str) -> ConfigMap {
        ConfigMap {
            data: Some([(SHOOT_NAME_KEY.to_string(), name.to_string())].into()),
            ..Default::default()
        }
    }

    fn kube(
        telemetry: Result<Option<DynamicObject>, ()>,
        shoot: Option<ConfigMap>,
    ) -> MockLogPipelineKubeClient {
        let mut kube = MockLogPipelineKubeClient::new();
        kube.expect_get_telemetry()
            .withf(|ns, name| ns == "kyma-system" && name == DEFAULT_TELEMETRY_NAME)
            .returning(move |_, _| {
                telemetry
                    .clone()
                    .map_err(|_| Error::internal("telemetries forbidden"))
            });
        kube.expect_get_config_map()
            .withf(|ns, name| ns == SHOOT_INFO_NAMESPACE && name == SHOOT_INFO_CONFIG_MAP)
            .returning(move |_, _| Ok(shoot.clone()));
        kube
    }

    #[tokio::test]
    async fn telemetry_enrichment_wins() {
        let kube = kube(Ok(Some(telemetry("prod-eu"))), Some(shoot_info("c-1234")));
        assert_eq!(
            resolve_cluster_name(&kube, &ReconcilerConfig::default()).await,
            "prod-eu"
        );
    }

    #[tokio::test]
    async fn shoot_name_when_enrichment_is_empty() {
        let kube = kube(Ok(Some(telemetry(""))), Some(shoot_info("c-1234")));
        assert_eq!(
            resolve_cluster_name(&kube, &ReconcilerConfig::default()).await,
            "c-1234"
        );
    }

    #[tokio::test]
    async fn unreadable_telemetry_falls_back_to_shoot_name() {
        let kube = kube(Err(()), Some(shoot_info("c-1234")));
        assert_eq!(
            resolve_cluster_name(&kube, &ReconcilerConfig::default()).await,
            "c-1234"
        );
    }

    #[tokio::test]
    async fn configured_default_is_last_resort() {
        let kube = kube(Ok(None), None);
        let mut config = ReconcilerConfig::default();
        config.render.cluster_name = "from-flag".to_string();
        assert_eq!(resolve_cluster_name(&kube, &config).await, "from-flag");
    }
}
