//! Pipeline admission lock
//!
//! A ConfigMap whose owner references are the admitted pipelines. Admission
//! is arbitrated by the API server: the lock is replaced with the
//! resourceVersion it was read at, so of two pipelines racing for the last
//! slot one gets a conflict, is requeued and then finds the lock full.
//!
//! Because the pipelines own the lock, the garbage collector drops the
//! reference of a deleted pipeline without any help from the controller.

use std::collections::BTreeSet;

use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use thiserror::Error;
use tracing::{debug, info};

use telemetry_common::crd::LogPipeline;
use telemetry_common::kube_utils::standard_labels;
use telemetry_common::Error;

use crate::client::LogPipelineKubeClient;

/// Lock failures
#[derive(Debug, Error)]
pub enum LockError {
    /// Every slot is taken by another pipeline
    #[error("maximum pipeline count limit exceeded")]
    MaxPipelinesExceeded,

    /// The lock could not be read or written
    #[error("failed to {op} lock: {source}")]
    Api {
        /// What was attempted
        op: &'static str,
        /// Underlying error
        #[source]
        source: Error,
    },
}

impl From<LockError> for Error {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Api { source, .. } => source,
            LockError::MaxPipelinesExceeded => {
                Error::internal_with_context("lock", err.to_string())
            }
        }
    }
}

fn api(op: &'static str) -> impl FnOnce(Error) -> LockError {
    move |source| LockError::Api { op, source }
}

/// ConfigMap-backed lock admitting at most `max_owners` pipelines
pub struct PipelineLock<'a> {
    kube: &'a dyn LogPipelineKubeClient,
    namespace: &'a str,
    name: &'a str,
    max_owners: usize,
}

impl<'a> PipelineLock<'a> {
    /// Lock `namespace/name`; `max_owners == 0` means unlimited
    pub fn new(
        kube: &'a dyn LogPipelineKubeClient,
        namespace: &'a str,
        name: &'a str,
        max_owners: usize,
    ) -> Self {
        Self {
            kube,
            namespace,
            name,
            max_owners,
        }
    }

    async fn read(&self) -> Result<Option<ConfigMap>, LockError> {
        self.kube
            .get_config_map(self.namespace, self.name)
            .await
            .map_err(api("get"))
    }

    /// Admit `pipeline`, creating the lock on first use.
    ///
    /// Holding the lock already is success; a full lock is
    /// [`LockError::MaxPipelinesExceeded`].
    pub async fn try_acquire(&self, pipeline: &LogPipeline) -> Result<(), LockError> {
        let owner = owner_reference(pipeline);

        let Some(mut lock) = self.read().await? else {
            let lock = ConfigMap {
                metadata: ObjectMeta {
                    name: Some(self.name.to_string()),
                    namespace: Some(self.namespace.to_string()),
                    labels: Some(standard_labels(self.name)),
                    owner_references: Some(vec![owner]),
                    ..Default::default()
                },
                ..Default::default()
            };
            self.kube
                .create_config_map(&lock)
                .await
                .map_err(api("create"))?;
            info!(pipeline = %pipeline.name_any(), "created pipeline lock");
            return Ok(());
        };

        let refs = lock.metadata.owner_references.get_or_insert_with(Vec::new);
        if refs.iter().any(|r| same_owner(r, &owner)) {
            return Ok(());
        }
        if self.max_owners != 0 && refs.len() >= self.max_owners {
            debug!(
                pipeline = %pipeline.name_any(),
                holders = refs.len(),
                "pipeline lock is full"
            );
            return Err(LockError::MaxPipelinesExceeded);
        }

        refs.push(owner);
        self.kube
            .replace_config_map(&lock)
            .await
            .map_err(api("update"))?;
        info!(pipeline = %pipeline.name_any(), "acquired pipeline lock");
        Ok(())
    }

    /// True when `pipeline` is among the owners
    #[cfg(test)]
    pub async fn is_lock_holder(&self, pipeline: &LogPipeline) -> Result<bool, LockError> {
        let owner = owner_reference(pipeline);
        Ok(self
            .read()
            .await?
            .and_then(|lock| lock.metadata.owner_references)
            .is_some_and(|refs| refs.iter().any(|r| same_owner(r, &owner))))
    }

    /// Drop `pipeline` from the owners. No write happens when it holds no slot.
    pub async fn release_if_held(&self, pipeline: &LogPipeline) -> Result<(), LockError> {
        let owner = owner_reference(pipeline);
        let Some(mut lock) = self.read().await? else {
            return Ok(());
        };
        let Some(refs) = lock.metadata.owner_references.as_mut() else {
            return Ok(());
        };

        let before = refs.len();
        refs.retain(|r| !same_owner(r, &owner));
        if refs.len() == before {
            return Ok(());
        }

        self.kube
            .replace_config_map(&lock)
            .await
            .map_err(api("update"))?;
        info!(pipeline = %pipeline.name_any(), "released pipeline lock");
        Ok(())
    }

    /// UIDs of every admitted pipeline
    pub async fn holders(&self) -> Result<BTreeSet<String>, LockError> {
        Ok(self
            .read()
            .await?
            .and_then(|lock| lock.metadata.owner_references)
            .unwrap_or_default()
            .into_iter()
            .map(|r| r.uid)
            .collect())
    }
}

fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    a.name == b.name && a.uid == b.uid
}

/// Owner reference pointing at `pipeline`
pub fn owner_reference(pipeline: &LogPipeline) -> OwnerReference {
    OwnerReference {
        api_version: LogPipeline::api_version(&()).to_string(),
        kind: LogPipeline::kind(&()).to_string(),
        name: pipeline.name_any(),
        uid: pipeline.uid().unwrap_or_default(),
        ..Default::default()
    }
}
