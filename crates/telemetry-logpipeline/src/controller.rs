//! LogPipeline controller
//!
//! One reconcile admits or rejects the triggering pipeline, then converges
//! the shared agent from every reconcilable pipeline, and finally derives
//! the pipeline's status. Shared artifacts are rebuilt as a union, so a
//! pipeline leaving the set (deleted, rejected, evicted from the lock) drops
//! its keys on the next apply.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use telemetry_common::crd::LogPipeline;
use telemetry_common::Error;
use telemetry_fluentbit::RenderConfig;

use crate::agent::{apply_agent, delete_agent, AgentBundle};
use crate::client::LogPipelineKubeClient;
use crate::cluster_name::resolve_cluster_name;
use crate::config::ReconcilerConfig;
use crate::lock::{LockError, PipelineLock};
use crate::overrides::load_overrides;
use crate::probe::FlowHealthProber;
use crate::secrets::project_secrets;
use crate::status::{update_status, ConfigState};
use crate::validation::{validate, ValidationError};

/// Finalizer guarding the pipeline's key in the sections ConfigMap
pub const FINALIZER_SECTIONS: &str = "FLUENT_BIT_SECTIONS_CONFIG_MAP";
/// Finalizer guarding the pipeline's keys in the files ConfigMap
pub const FINALIZER_FILES: &str = "FLUENT_BIT_FILES";

const RETRY_DELAY: Duration = Duration::from_secs(30);

/// Controller context
pub struct Context {
    /// Kubernetes client (trait object for testability)
    pub kube: Arc<dyn LogPipelineKubeClient>,
    /// Self-monitor flow health source
    pub flow_prober: Arc<dyn FlowHealthProber>,
    /// Reconciler settings
    pub config: ReconcilerConfig,
}

impl Context {
    /// Create a context
    pub fn new(
        kube: Arc<dyn LogPipelineKubeClient>,
        flow_prober: Arc<dyn FlowHealthProber>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            kube,
            flow_prober,
            config,
        }
    }

    /// Context with default settings around mocks
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn LogPipelineKubeClient>,
        flow_prober: Arc<dyn FlowHealthProber>,
    ) -> Self {
        Self::new(kube, flow_prober, ReconcilerConfig::default())
    }

    fn lock(&self) -> PipelineLock<'_> {
        PipelineLock::new(
            self.kube.as_ref(),
            &self.config.namespace,
            &self.config.names.lock,
            self.config.max_pipelines,
        )
    }
}

/// Reconcile a LogPipeline
#[instrument(skip(obj, ctx), fields(pipeline = %obj.name_any()))]
pub async fn reconcile(obj: Arc<LogPipeline>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = obj.name_any();
    let kube = ctx.kube.as_ref();

    if load_overrides(kube, &ctx.config).await?.logging.paused {
        debug!("reconciliation paused by overrides");
        return Ok(Action::await_change());
    }

    // the watch event may be stale; the lock and finalizers need the latest
    let Some(pipeline) = kube.get_pipeline(&name).await? else {
        debug!("pipeline is gone");
        return Ok(Action::await_change());
    };

    if ctx.config.fips_mode {
        return reconcile_fips(&pipeline, &ctx).await;
    }

    let deleting = pipeline.is_being_deleted();
    let mut errors = Vec::new();

    let state = if deleting {
        ctx.lock().release_if_held(&pipeline).await?;
        None
    } else {
        ensure_finalizers(kube, &pipeline).await?;
        let (state, failure) = admit(&ctx, &pipeline).await?;
        errors.extend(failure);
        Some(state)
    };

    match converge_agent(&ctx, Utc::now()).await {
        Ok(()) => {
            if deleting {
                remove_finalizers(kube, &pipeline).await?;
            }
        }
        Err(e) => errors.push(e),
    }

    if let Some(state) = state {
        if let Err(e) = update_status(
            kube,
            ctx.flow_prober.as_ref(),
            &ctx.config,
            &pipeline,
            &state,
        )
        .await
        {
            errors.push(e);
        }
    }

    match Error::join(errors) {
        Some(e) => Err(e),
        None => Ok(Action::requeue(ctx.config.requeue_interval)),
    }
}

/// Fluent Bit is not FIPS compliant: give up the slot, withdraw the agent
/// and report why
async fn reconcile_fips(pipeline: &LogPipeline, ctx: &Context) -> Result<Action, Error> {
    let kube = ctx.kube.as_ref();
    ctx.lock().release_if_held(pipeline).await?;
    delete_agent(kube, &ctx.config).await?;

    if pipeline.is_being_deleted() {
        remove_finalizers(kube, pipeline).await?;
        return Ok(Action::await_change());
    }

    update_status(
        kube,
        ctx.flow_prober.as_ref(),
        &ctx.config,
        pipeline,
        &ConfigState::FipsMode,
    )
    .await?;
    Ok(Action::await_change())
}

/// Validate `pipeline` and take or release its lock slot.
///
/// A secret API failure still yields a state for the status; the error is
/// handed back so the reconcile is retried.
async fn admit(
    ctx: &Context,
    pipeline: &LogPipeline,
) -> Result<(ConfigState, Option<Error>), Error> {
    let lock = ctx.lock();

    let invalid = match validate(ctx.kube.as_ref(), pipeline, &ctx.config.render, Utc::now()).await {
        Ok(()) => None,
        Err(e) if e.is_informative() => Some(e),
        Err(e) => {
            lock.release_if_held(pipeline).await?;
            let failure = e
                .is_api_failure()
                .then(|| Error::internal_with_context("validation", e.to_string()));
            info!(reason = e.reason(), error = %e, "pipeline is not reconcilable");
            return Ok((ConfigState::Invalid(e), failure));
        }
    };

    match lock.try_acquire(pipeline).await {
        Ok(()) => Ok((
            invalid.map_or(ConfigState::Generated, ConfigState::Invalid),
            None,
        )),
        Err(LockError::MaxPipelinesExceeded) => {
            info!("pipeline lock is full");
            Ok((ConfigState::MaxPipelinesExceeded, None))
        }
        Err(e) => Err(e.into()),
    }
}

fn is_reconcilable(pipeline: &LogPipeline, holders: &BTreeSet<String>) -> bool {
    !pipeline.is_being_deleted()
        && pipeline.spec.application_input_enabled()
        && pipeline.uid().is_some_and(|uid| holders.contains(&uid))
}

/// Rebuild the agent from every reconcilable pipeline, or withdraw it when
/// none is left
async fn converge_agent(ctx: &Context, now: DateTime<Utc>) -> Result<(), Error> {
    let kube = ctx.kube.as_ref();
    let holders = ctx.lock().holders().await?;
    let pipelines = kube.list_pipelines().await?;

    let mut reconcilable = Vec::new();
    for pipeline in pipelines.iter().filter(|p| is_reconcilable(p, &holders)) {
        match validate(kube, pipeline, &ctx.config.render, now).await {
            Ok(()) => reconcilable.push(pipeline),
            Err(e) if e.is_informative() => reconcilable.push(pipeline),
            Err(e) if e.is_api_failure() => {
                return Err(Error::internal_with_context("validation", e.to_string()));
            }
            Err(e) => log_excluded(pipeline, &e),
        }
    }

    if reconcilable.is_empty() {
        return delete_agent(kube, &ctx.config).await;
    }

    let secrets = project_secrets(kube, &reconcilable).await?;
    let render = RenderConfig {
        cluster_name: resolve_cluster_name(kube, &ctx.config).await,
        ..ctx.config.render.clone()
    };
    let bundle = AgentBundle::build(&reconcilable, &render, secrets);
    let istio_active = kube.istio_active().await?;
    apply_agent(kube, &ctx.config, &bundle, istio_active).await
}

fn log_excluded(pipeline: &LogPipeline, err: &ValidationError) {
    debug!(
        peer = %pipeline.name_any(),
        reason = err.reason(),
        "excluding invalid pipeline from agent configuration"
    );
}

fn wanted_finalizers(pipeline: &LogPipeline) -> Vec<&'static str> {
    let mut wanted = vec![FINALIZER_SECTIONS];
    if !pipeline.spec.files.is_empty() {
        wanted.push(FINALIZER_FILES);
    }
    wanted
}

async fn ensure_finalizers(
    kube: &dyn LogPipelineKubeClient,
    pipeline: &LogPipeline,
) -> Result<(), Error> {
    let mut finalizers = pipeline.finalizers().to_vec();
    let before = finalizers.len();
    for finalizer in wanted_finalizers(pipeline) {
        if !finalizers.iter().any(|f| f == finalizer) {
            finalizers.push(finalizer.to_string());
        }
    }
    if finalizers.len() == before {
        return Ok(());
    }
    kube.set_pipeline_finalizers(&pipeline.name_any(), finalizers)
        .await
}

async fn remove_finalizers(
    kube: &dyn LogPipelineKubeClient,
    pipeline: &LogPipeline,
) -> Result<(), Error> {
    let finalizers = pipeline.finalizers();
    let kept: Vec<String> = finalizers
        .iter()
        .filter(|f| f.as_str() != FINALIZER_SECTIONS && f.as_str() != FINALIZER_FILES)
        .cloned()
        .collect();
    if kept.len() == finalizers.len() {
        return Ok(());
    }
    info!(pipeline = %pipeline.name_any(), "removing finalizers");
    kube.set_pipeline_finalizers(&pipeline.name_any(), kept)
        .await
}

/// Requeue retryable failures; wait for a change otherwise
pub fn error_policy(pipeline: Arc<LogPipeline>, error: &Error, _ctx: Arc<Context>) -> Action {
    let retryable = error.is_retryable();
    error!(
        ?error,
        pipeline = %pipeline.name_any(),
        retryable,
        "reconciliation failed"
    );
    if retryable {
        Action::requeue(RETRY_DELAY)
    } else {
        warn!(pipeline = %pipeline.name_any(), "waiting for the next change");
        Action::await_change()
    }
}
