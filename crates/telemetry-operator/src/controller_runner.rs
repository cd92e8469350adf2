//! Controller runner - wires the LogPipeline controller and its watches
//!
//! Besides LogPipelines the controller watches the objects it generates, the
//! overrides ConfigMap and every Secret. Generated objects and overrides
//! concern all pipelines, so a change to one requeues every pipeline; a
//! Secret change requeues the pipelines referencing it.

use std::sync::Arc;

use futures::StreamExt;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Secret};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};

use telemetry_common::crd::LogPipeline;
use telemetry_common::kube_utils::{LABEL_MANAGED_BY, LABEL_MANAGED_BY_VALUE};
use telemetry_logpipeline::validation::secret_ref::secret_refs;
use telemetry_logpipeline::{error_policy, reconcile, Context};

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn generated_objects() -> WatcherConfig {
    watcher_config().labels(&format!("{LABEL_MANAGED_BY}={LABEL_MANAGED_BY_VALUE}"))
}

fn overrides_object(name: &str) -> WatcherConfig {
    watcher_config().fields(&format!("metadata.name={name}"))
}

fn all_pipelines(store: &Store<LogPipeline>) -> Vec<ObjectRef<LogPipeline>> {
    store
        .state()
        .iter()
        .map(|p| ObjectRef::from_obj(p.as_ref()))
        .collect()
}

/// Pipelines to requeue for a changed Secret
fn pipelines_for_secret(
    store: &Store<LogPipeline>,
    secret: &Secret,
) -> Vec<ObjectRef<LogPipeline>> {
    let generated = secret
        .labels()
        .get(LABEL_MANAGED_BY)
        .is_some_and(|v| v == LABEL_MANAGED_BY_VALUE);
    if generated {
        return all_pipelines(store);
    }

    let namespace = secret.namespace().unwrap_or_default();
    let name = secret.name_any();
    store
        .state()
        .iter()
        .filter(|p| {
            secret_refs(p)
                .iter()
                .any(|r| r.namespace == namespace && r.name == name)
        })
        .map(|p| ObjectRef::from_obj(p.as_ref()))
        .collect()
}

/// Run the LogPipeline controller until a shutdown signal arrives
pub async fn run_log_pipeline_controller(client: Client, ctx: Arc<Context>) {
    let namespace = ctx.config.namespace.clone();
    let pipelines: Api<LogPipeline> = Api::all(client.clone());
    let daemon_sets: Api<DaemonSet> = Api::namespaced(client.clone(), &namespace);
    let config_maps: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let overrides: Api<ConfigMap> = Api::namespaced(client.clone(), &namespace);
    let overrides_config = overrides_object(&ctx.config.overrides_config_map);
    let secrets: Api<Secret> = Api::all(client);

    tracing::info!(namespace = %namespace, "- LogPipeline controller");

    let controller = Controller::new(pipelines, watcher_config());
    let store = controller.store();
    let ds_store = store.clone();
    let cm_store = store.clone();
    let overrides_store = store.clone();

    controller
        .watches(daemon_sets, generated_objects(), move |_| {
            all_pipelines(&ds_store)
        })
        .watches(config_maps, generated_objects(), move |_| {
            all_pipelines(&cm_store)
        })
        .watches(overrides, overrides_config, move |_| {
            all_pipelines(&overrides_store)
        })
        .watches(secrets, watcher_config(), move |secret| {
            pipelines_for_secret(&store, &secret)
        })
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("LogPipeline"))
        .await;
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
