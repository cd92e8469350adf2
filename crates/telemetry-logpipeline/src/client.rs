//! Kubernetes access for the LogPipeline controller
//!
//! Everything the reconciler reads or writes goes through
//! [`LogPipelineKubeClient`] so that story tests can drive the controller
//! with a mock.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Pod, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{DynamicObject, ListParams, Patch, PatchParams, PostParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Api, Client};
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use telemetry_common::crd::{LogPipeline, LogPipelineStatus};
use telemetry_common::kube_utils::{
    is_already_exists, is_not_found, patch_cluster_resource_status, FIELD_MANAGER,
};
use telemetry_common::Error;

use crate::resources::{AgentKind, AgentResource};

/// CRD whose presence means the Istio control plane is installed
pub const ISTIO_PEER_AUTHENTICATION_CRD: &str = "peerauthentications.security.istio.io";

fn telemetry_api_resource() -> ApiResource {
    let gvk = GroupVersionKind::gvk("operator.kyma-project.io", "v1alpha1", "Telemetry");
    ApiResource::from_gvk_with_plural(&gvk, "telemetries")
}

/// Trait abstracting Kubernetes operations of the LogPipeline controller
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LogPipelineKubeClient: Send + Sync {
    /// Get a LogPipeline by name
    async fn get_pipeline(&self, name: &str) -> Result<Option<LogPipeline>, Error>;

    /// List every LogPipeline
    async fn list_pipelines(&self) -> Result<Vec<LogPipeline>, Error>;

    /// Patch the status of a LogPipeline
    async fn patch_pipeline_status(
        &self,
        name: &str,
        status: &LogPipelineStatus,
    ) -> Result<(), Error>;

    /// Replace the finalizer list of a LogPipeline
    async fn set_pipeline_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error>;

    /// Get a Secret, `None` if absent
    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error>;

    /// Get a ConfigMap, `None` if absent
    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error>;

    /// Create a ConfigMap; fails if it exists
    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;

    /// Replace a ConfigMap. The carried resourceVersion makes a stale write
    /// fail with a conflict.
    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<(), Error>;

    /// Server-side apply an agent object
    async fn apply(&self, resource: &AgentResource) -> Result<(), Error>;

    /// Create an agent object unless it exists. Returns whether it was created.
    async fn create_if_absent(&self, resource: &AgentResource) -> Result<bool, Error>;

    /// Delete an agent object; absent objects are not an error
    async fn delete(&self, kind: AgentKind, namespace: &str, name: &str) -> Result<(), Error>;

    /// Get the agent DaemonSet, `None` if absent
    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DaemonSet>, Error>;

    /// List pods matching a label selector
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error>;

    /// True when the Istio control plane is installed
    async fn istio_active(&self) -> Result<bool, Error>;

    /// Get a Telemetry resource, `None` if absent or not installed
    async fn get_telemetry(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;
}

/// Real Kubernetes client implementation
pub struct LogPipelineKubeClientImpl {
    client: Client,
}

impl LogPipelineKubeClientImpl {
    /// Wrap a kube client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn dynamic_api(&self, kind: AgentKind, namespace: &str) -> Api<DynamicObject> {
        let ar = kind.api_resource();
        if kind.is_namespaced() {
            Api::namespaced_with(self.client.clone(), namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }
}

#[async_trait]
impl LogPipelineKubeClient for LogPipelineKubeClientImpl {
    async fn get_pipeline(&self, name: &str) -> Result<Option<LogPipeline>, Error> {
        let api: Api<LogPipeline> = Api::all(self.client.clone());
        match api.get(name).await {
            Ok(p) => Ok(Some(p)),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pipelines(&self) -> Result<Vec<LogPipeline>, Error> {
        let api: Api<LogPipeline> = Api::all(self.client.clone());
        let list = api.list(&Default::default()).await?;
        Ok(list.items)
    }

    async fn patch_pipeline_status(
        &self,
        name: &str,
        status: &LogPipelineStatus,
    ) -> Result<(), Error> {
        patch_cluster_resource_status::<LogPipeline>(&self.client, name, status).await?;
        Ok(())
    }

    async fn set_pipeline_finalizers(
        &self,
        name: &str,
        finalizers: Vec<String>,
    ) -> Result<(), Error> {
        let api: Api<LogPipeline> = Api::all(self.client.clone());
        let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
        api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>, Error> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_config_map(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ConfigMap>, Error> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let namespace = config_map.metadata.namespace.as_deref().unwrap_or_default();
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.create(&PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<(), Error> {
        let namespace = config_map.metadata.namespace.as_deref().unwrap_or_default();
        let name = config_map.metadata.name.as_deref().ok_or_else(|| {
            Error::internal_with_context("replace_config_map", "ConfigMap has no name")
        })?;
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        api.replace(name, &PostParams::default(), config_map).await?;
        Ok(())
    }

    async fn apply(&self, resource: &AgentResource) -> Result<(), Error> {
        let kind = resource.kind();
        let api = self.dynamic_api(kind, resource.namespace());
        let body = resource.to_json()?;
        api.patch(
            resource.name(),
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(&body),
        )
        .await?;
        debug!(kind = %kind, name = %resource.name(), "applied agent resource");
        Ok(())
    }

    async fn create_if_absent(&self, resource: &AgentResource) -> Result<bool, Error> {
        let kind = resource.kind();
        let api = self.dynamic_api(kind, resource.namespace());
        let obj: DynamicObject = serde_json::from_value(resource.to_json()?)?;
        match api.create(&PostParams::default(), &obj).await {
            Ok(_) => {
                debug!(kind = %kind, name = %resource.name(), "created agent resource");
                Ok(true)
            }
            Err(e) if is_already_exists(&e) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, kind: AgentKind, namespace: &str, name: &str) -> Result<(), Error> {
        let api = self.dynamic_api(kind, namespace);
        match api.delete(name, &Default::default()).await {
            Ok(_) => {
                debug!(kind = %kind, name = %name, "deleted agent resource");
                Ok(())
            }
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_daemon_set(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DaemonSet>, Error> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, Error> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn istio_active(&self) -> Result<bool, Error> {
        let api: Api<CustomResourceDefinition> = Api::all(self.client.clone());
        Ok(api.get_opt(ISTIO_PEER_AUTHENTICATION_CRD).await?.is_some())
    }

    async fn get_telemetry(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &telemetry_api_resource());
        Ok(api.get_opt(name).await?)
    }
}
