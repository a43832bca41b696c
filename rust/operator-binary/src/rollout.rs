//! Forced restarts of workloads that mount credential material.
//!
//! Credential and drift logic only see the [`RolloutTrigger`] capability, the
//! store-backed implementation lives in [`StoreRolloutTrigger`].

use std::{fmt, future::Future};

use snafu::{ResultExt, Snafu};
use stackable_operator::k8s_openapi::api::{
    apps::v1::{Deployment, StatefulSet},
    core::v1::PodTemplateSpec,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::ROLLOUT_ANNOTATION_PREFIX,
    store::{self, ObjectStore, StoreObject},
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to retrieve {target}"))]
    RetrieveWorkload {
        source: store::Error,
        target: RolloutTarget,
    },

    #[snafu(display("failed to annotate pod template of {target}"))]
    AnnotateWorkload {
        source: store::Error,
        target: RolloutTarget,
    },

    #[snafu(display("failed to delete {target}"))]
    DeleteWorkload {
        source: store::Error,
        target: RolloutTarget,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkloadKind {
    Deployment,
    StatefulSet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartStrategy {
    /// Refresh an annotation on the pod template, the workload controller rolls the pods.
    RollingRestart,
    /// Delete the workload outright. Used for clustered members that cannot run
    /// mixed configurations side by side during a rolling restart.
    Recreate,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RolloutTarget {
    pub kind: WorkloadKind,
    pub name: String,
    pub strategy: RestartStrategy,
}

impl RolloutTarget {
    pub fn deployment(name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::Deployment,
            name: name.into(),
            strategy: RestartStrategy::RollingRestart,
        }
    }

    pub fn stateful_set(name: impl Into<String>) -> Self {
        Self {
            kind: WorkloadKind::StatefulSet,
            name: name.into(),
            strategy: RestartStrategy::RollingRestart,
        }
    }

    pub fn recreated_stateful_set(name: impl Into<String>) -> Self {
        Self {
            strategy: RestartStrategy::Recreate,
            ..Self::stateful_set(name)
        }
    }
}

impl fmt::Display for RolloutTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} {:?}", self.kind, self.name)
    }
}

pub trait RolloutTrigger: Send + Sync {
    /// Restarts the pods of `target`. A workload that does not exist is skipped.
    fn restart(
        &self,
        namespace: &str,
        target: &RolloutTarget,
        reason: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Restarts every target in order. A failing target does not stop the cascade;
/// the first failure is returned once every target was attempted.
pub async fn restart_all<R: RolloutTrigger>(
    rollout: &R,
    namespace: &str,
    targets: &[RolloutTarget],
    reason: &str,
) -> Result<()> {
    let mut first_error = None;
    for target in targets {
        if let Err(error) = rollout.restart(namespace, target, reason).await {
            tracing::error!(%target, %error, reason, "Failed to trigger rollout");
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}

trait PodTemplateOwner: StoreObject {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec>;
}

impl PodTemplateOwner for Deployment {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

impl PodTemplateOwner for StatefulSet {
    fn pod_template_mut(&mut self) -> Option<&mut PodTemplateSpec> {
        self.spec.as_mut().map(|spec| &mut spec.template)
    }
}

pub fn rollout_annotation_key(reason: &str) -> String {
    format!("{ROLLOUT_ANNOTATION_PREFIX}/{reason}")
}

/// [`RolloutTrigger`] that patches or deletes workloads through an [`ObjectStore`].
pub struct StoreRolloutTrigger<'a, S> {
    store: &'a S,
}

impl<'a, S: ObjectStore> StoreRolloutTrigger<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    async fn annotate<K: PodTemplateOwner>(
        &self,
        namespace: &str,
        target: &RolloutTarget,
        reason: &str,
    ) -> Result<()> {
        let Some(mut workload) = self
            .store
            .get::<K>(namespace, &target.name)
            .await
            .context(RetrieveWorkloadSnafu { target: target.clone() })?
        else {
            tracing::info!(%target, "Workload not found, skipping rollout");
            return Ok(());
        };
        let Some(template) = workload.pod_template_mut() else {
            tracing::warn!(%target, "Workload has no pod template, skipping rollout");
            return Ok(());
        };

        let restarted_at = chrono::Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_string();
        template
            .metadata
            .get_or_insert_with(Default::default)
            .annotations
            .get_or_insert_with(Default::default)
            .insert(rollout_annotation_key(reason), restarted_at);

        tracing::info!(%target, reason, "Triggering rollout");
        self.store
            .update(&workload)
            .await
            .context(AnnotateWorkloadSnafu { target: target.clone() })
    }

    async fn recreate<K: StoreObject>(
        &self,
        namespace: &str,
        target: &RolloutTarget,
    ) -> Result<()> {
        let Some(workload) = self
            .store
            .get::<K>(namespace, &target.name)
            .await
            .context(RetrieveWorkloadSnafu { target: target.clone() })?
        else {
            tracing::info!(%target, "Workload not found, skipping recreation");
            return Ok(());
        };

        tracing::info!(%target, "Deleting workload so it is recreated with all members at once");
        match self.store.delete(&workload).await {
            Ok(()) | Err(store::Error::NotFound { .. }) => Ok(()),
            Err(source) => Err(source).context(DeleteWorkloadSnafu { target: target.clone() }),
        }
    }
}

impl<S: ObjectStore> RolloutTrigger for StoreRolloutTrigger<'_, S> {
    async fn restart(&self, namespace: &str, target: &RolloutTarget, reason: &str) -> Result<()> {
        match (target.kind, target.strategy) {
            (WorkloadKind::Deployment, RestartStrategy::RollingRestart) => {
                self.annotate::<Deployment>(namespace, target, reason).await
            }
            (WorkloadKind::StatefulSet, RestartStrategy::RollingRestart) => {
                self.annotate::<StatefulSet>(namespace, target, reason).await
            }
            (WorkloadKind::Deployment, RestartStrategy::Recreate) => {
                self.recreate::<Deployment>(namespace, target).await
            }
            (WorkloadKind::StatefulSet, RestartStrategy::Recreate) => {
                self.recreate::<StatefulSet>(namespace, target).await
            }
        }
    }
}
