//! Ensures that the credentials of every [`ArgoCd`] instance exist, are in sync,
//! and that workloads are restarted when their TLS material changes.

use std::{sync::Arc, time::Duration};

use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::{
    kube::{
        core::{error_boundary, DeserializeGuard},
        runtime::controller::Action,
        ResourceExt,
    },
    logging::controller::ReconcilerError,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    config::OperatorConfig,
    context::ReconcileContext,
    crd::ArgoCd,
    drift::{self, TrackedTlsSecret},
    rollout::{RolloutTrigger, StoreRolloutTrigger},
    secrets, service,
    store::{self, KubeStore, ObjectStore},
};

pub const CONTROLLER_NAME: &str = "argocd";
/// [`CONTROLLER_NAME`] qualified with [`crate::crd::OPERATOR_NAME`].
pub const FULL_CONTROLLER_NAME: &str = "argocd.argocd.stackable.tech";

pub struct Ctx {
    pub client: stackable_operator::client::Client,
    pub config: OperatorConfig,
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("ArgoCD object is invalid"))]
    InvalidArgoCd {
        source: error_boundary::InvalidObject,
    },

    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to reconcile secrets"))]
    ReconcileSecrets { source: secrets::Error },

    #[snafu(display("failed to reconcile serving certificate annotations"))]
    ReconcileServiceAnnotations { source: service::Error },

    #[snafu(display("failed to reconcile TLS drift"))]
    ReconcileTlsDrift { source: drift::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// The store failure this error was ultimately caused by, if any.
    fn store_error(&self) -> Option<&store::Error> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(error) = current {
            if let Some(store_error) = error.downcast_ref::<store::Error>() {
                return Some(store_error);
            }
            current = error.source();
        }
        None
    }
}

impl ReconcilerError for Error {
    fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }
}

pub async fn reconcile_argocd(
    argocd: Arc<DeserializeGuard<ArgoCd>>,
    ctx: Arc<Ctx>,
) -> Result<Action> {
    tracing::info!("Starting reconcile");

    let argocd = argocd
        .0
        .as_ref()
        .map_err(error_boundary::InvalidObject::clone)
        .context(InvalidArgoCdSnafu)?;
    let store = KubeStore::new(ctx.client.as_kube_client());
    let rollout = StoreRolloutTrigger::new(&store);

    run_pass(argocd, &store, &rollout, &ctx.config).await
}

/// One full reconciliation pass: secrets in dependency order, serving certificate
/// annotations, then drift of the externally managed TLS secrets.
pub async fn run_pass<S: ObjectStore, R: RolloutTrigger>(
    argocd: &ArgoCd,
    store: &S,
    rollout: &R,
    config: &OperatorConfig,
) -> Result<Action> {
    let namespace = argocd.namespace().context(ObjectHasNoNamespaceSnafu)?;
    let ctx = ReconcileContext {
        argocd,
        namespace: &namespace,
        store,
        rollout,
        config,
    };

    secrets::reconcile_secrets(&ctx)
        .await
        .context(ReconcileSecretsSnafu)?;
    service::reconcile_auto_tls_annotations(&ctx)
        .await
        .context(ReconcileServiceAnnotationsSnafu)?;

    // Status writes replace our copy, so the second detector does not conflict
    // with the first one's write.
    let mut argocd = argocd.clone();
    for tracked in [
        TrackedTlsSecret::repo_server(&argocd),
        TrackedTlsSecret::redis(&argocd),
    ] {
        drift::reconcile_tls_drift(&mut argocd, &namespace, store, rollout, &tracked)
            .await
            .context(ReconcileTlsDriftSnafu)?;
    }

    Ok(Action::await_change())
}

pub fn error_policy(
    _obj: Arc<DeserializeGuard<ArgoCd>>,
    error: &Error,
    _ctx: Arc<Ctx>,
) -> Action {
    if error.store_error().is_some_and(store::Error::is_retryable) {
        tracing::debug!("Write raced with a concurrent change, requeueing with fresh state");
    }
    Action::requeue(Duration::from_secs(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        credentials::password::verify_password,
        crd::{
            tls::{REDIS_TLS_SECRET_NAME, REPO_SERVER_TLS_SECRET_NAME},
            ARGOCD_SECRET_NAME, KEY_ADMIN_PASSWORD, OPERATOR_NAME,
        },
        secrets::meta::{secret_field, TLS_CERT_KEY},
        testability_helpers::{argocd, opaque_secret, tls_secret, Harness},
    };

    #[test]
    fn test_full_controller_name() {
        assert_eq!(
            FULL_CONTROLLER_NAME,
            format!("{CONTROLLER_NAME}.{OPERATOR_NAME}")
        );
    }

    #[test]
    fn test_error_category_is_variant_name() {
        assert_eq!(Error::ObjectHasNoNamespace.category(), "ObjectHasNoNamespace");
    }

    #[tokio::test]
    async fn test_repeated_pass_is_idempotent() {
        let harness = Harness::new(argocd());
        harness.store.insert(harness.argocd.clone());
        harness
            .store
            .insert(tls_secret(REPO_SERVER_TLS_SECRET_NAME, b"cert", b"key"));
        harness
            .store
            .insert(tls_secret(REDIS_TLS_SECRET_NAME, b"cert", b"key"));

        run_pass(&harness.argocd, &harness.store, &harness.rollout, &harness.config)
            .await
            .unwrap();
        let mutations = harness.store.mutation_count();
        assert_eq!(
            harness.store.mutations()[mutations - 2..],
            ["update_status ArgoCD example", "update_status ArgoCD example"]
        );

        let stored = harness.store.get_object::<ArgoCd>("example").unwrap();
        run_pass(&stored, &harness.store, &harness.rollout, &harness.config)
            .await
            .unwrap();
        assert_eq!(harness.store.mutation_count(), mutations);
    }

    #[tokio::test]
    async fn test_admin_password_change_reaches_composite_bundle() {
        let harness = Harness::new(argocd());
        run_pass(&harness.argocd, &harness.store, &harness.rollout, &harness.config)
            .await
            .unwrap();
        let before = harness.store.secret("argocd-secret").unwrap();

        let mut cluster_secret = harness.store.secret("example-cluster").unwrap();
        cluster_secret.data = opaque_secret("example-cluster", &[(KEY_ADMIN_PASSWORD, b"P2")]).data;
        harness.store.insert(cluster_secret);
        run_pass(&harness.argocd, &harness.store, &harness.rollout, &harness.config)
            .await
            .unwrap();

        let after = harness.store.secret("argocd-secret").unwrap();
        assert_ne!(
            secret_field(&before, KEY_ADMIN_PASSWORD),
            secret_field(&after, KEY_ADMIN_PASSWORD)
        );
        assert_eq!(
            secret_field(&before, TLS_CERT_KEY),
            secret_field(&after, TLS_CERT_KEY)
        );
    }

    #[tokio::test]
    async fn test_conflicting_update_is_recomputed_on_next_pass() {
        let harness = Harness::new(argocd());
        run_pass(&harness.argocd, &harness.store, &harness.rollout, &harness.config)
            .await
            .unwrap();
        let mut cluster_secret = harness.store.secret("example-cluster").unwrap();
        cluster_secret.data = opaque_secret("example-cluster", &[(KEY_ADMIN_PASSWORD, b"P2")]).data;
        harness.store.insert(cluster_secret);
        harness.store.race_next_update("Secret", ARGOCD_SECRET_NAME);

        let error = run_pass(&harness.argocd, &harness.store, &harness.rollout, &harness.config)
            .await
            .unwrap_err();

        assert!(matches!(error, Error::ReconcileSecrets { .. }));
        assert!(error.store_error().is_some_and(store::Error::is_retryable));
        let bundle = harness.store.secret(ARGOCD_SECRET_NAME).unwrap();
        let stored_hash = secret_field(&bundle, KEY_ADMIN_PASSWORD).unwrap();
        assert!(!verify_password(b"P2", stored_hash));

        run_pass(&harness.argocd, &harness.store, &harness.rollout, &harness.config)
            .await
            .unwrap();
        let bundle = harness.store.secret(ARGOCD_SECRET_NAME).unwrap();
        let stored_hash = secret_field(&bundle, KEY_ADMIN_PASSWORD).unwrap();
        assert!(verify_password(b"P2", stored_hash));
    }

    #[test]
    fn test_store_error_is_found_through_sources() {
        let error = Error::ReconcileServiceAnnotations {
            source: service::Error::UpdateService {
                source: store::Error::Conflict {
                    kind: "Service".to_owned(),
                    namespace: "argocd".to_owned(),
                    name: "example-redis".to_owned(),
                },
                service_name: "example-redis".to_owned(),
            },
        };

        assert!(error.store_error().is_some_and(store::Error::is_retryable));
        assert!(Error::ObjectHasNoNamespace.store_error().is_none());
    }

    #[tokio::test]
    async fn test_object_without_namespace_is_rejected() {
        let harness = Harness::new(argocd());
        let mut argocd = harness.argocd.clone();
        argocd.metadata.namespace = None;

        let result = run_pass(&argocd, &harness.store, &harness.rollout, &harness.config).await;

        assert!(matches!(result, Err(Error::ObjectHasNoNamespace)));
    }
}
