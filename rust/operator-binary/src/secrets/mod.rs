//! Table-driven reconciliation of every secret an Argo CD instance owns.
//!
//! [`RECONCILE_ORDER`] lists the steps. Each step names the secrets it needs; a
//! step whose prerequisites are missing is [`Outcome::Deferred`] instead of
//! failing, and the next pass (triggered when the prerequisite appears) picks it
//! up. Errors abort the remaining steps without undoing earlier ones, every step
//! is idempotent so the next pass resumes where this one stopped.

use std::{collections::BTreeMap, fmt};

use snafu::{OptionExt, ResultExt, Snafu};
use stackable_operator::k8s_openapi::api::core::v1::Secret;
use strum::{Display, EnumDiscriminants, IntoStaticStr};

use crate::{
    context::ReconcileContext,
    crd::{ArgoCd, ARGOCD_SECRET_NAME},
    rollout::RolloutTrigger,
    store::{self, ObjectStore},
};

pub mod argocd_secret;
pub mod cluster;
pub mod dashboard;
pub mod meta;
pub mod permissions;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to fetch prerequisite {kind} secret {secret_name:?}"))]
    FetchPrerequisite {
        source: store::Error,
        kind: SecretKind,
        secret_name: String,
    },

    #[snafu(display("prerequisite {kind} was not fetched"))]
    MissingPrerequisite { kind: SecretKind },

    #[snafu(display("failed to reconcile cluster admin secret"))]
    ClusterAdmin { source: cluster::Error },

    #[snafu(display("failed to reconcile certificate authority"))]
    CertificateAuthority { source: cluster::Error },

    #[snafu(display("failed to reconcile TLS secret"))]
    LeafTls { source: cluster::Error },

    #[snafu(display("failed to reconcile cluster permissions"))]
    ClusterPermissions { source: permissions::Error },

    #[snafu(display("failed to reconcile dashboard credentials"))]
    DashboardCredentials { source: dashboard::Error },

    #[snafu(display("failed to reconcile composite credential bundle"))]
    CompositeCredentials { source: argocd_secret::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, PartialOrd, Ord)]
#[strum(serialize_all = "kebab-case")]
pub enum SecretKind {
    ClusterAdmin,
    CertificateAuthority,
    LeafTls,
    ClusterPermissions,
    DashboardCredentials,
    CompositeCredentials,
}

/// Steps in the order they run. Every kind comes after its prerequisites.
pub const RECONCILE_ORDER: [SecretKind; 6] = [
    SecretKind::ClusterAdmin,
    SecretKind::CertificateAuthority,
    SecretKind::LeafTls,
    SecretKind::ClusterPermissions,
    SecretKind::DashboardCredentials,
    SecretKind::CompositeCredentials,
];

impl SecretKind {
    pub fn secret_name(self, argocd: &ArgoCd) -> String {
        match self {
            SecretKind::ClusterAdmin => argocd.cluster_secret_name(),
            SecretKind::CertificateAuthority => argocd.ca_secret_name(),
            SecretKind::LeafTls => argocd.tls_secret_name(),
            SecretKind::ClusterPermissions => argocd.cluster_permissions_secret_name(),
            SecretKind::DashboardCredentials => argocd.grafana_secret_name(),
            SecretKind::CompositeCredentials => ARGOCD_SECRET_NAME.to_owned(),
        }
    }

    /// Secrets that must exist before this one can be reconciled.
    pub fn prerequisites(self) -> &'static [SecretKind] {
        match self {
            SecretKind::ClusterAdmin
            | SecretKind::CertificateAuthority
            | SecretKind::ClusterPermissions => &[],
            SecretKind::LeafTls => &[SecretKind::CertificateAuthority],
            SecretKind::DashboardCredentials => &[SecretKind::ClusterAdmin],
            SecretKind::CompositeCredentials => &[SecretKind::ClusterAdmin, SecretKind::LeafTls],
        }
    }

    fn enabled(self, argocd: &ArgoCd) -> bool {
        match self {
            SecretKind::DashboardCredentials => argocd.spec.grafana.enabled,
            _ => true,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The step created or updated an object.
    Applied,
    /// Everything was already in place, nothing was written.
    Unchanged,
    /// The step does not apply to this instance.
    Skipped,
    /// An input is missing. Retried on a later pass.
    Deferred(Deferral),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Deferral {
    MissingPrerequisite {
        kind: SecretKind,
        secret_name: String,
    },
    DexClientSecretUnavailable,
}

impl fmt::Display for Deferral {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deferral::MissingPrerequisite { kind, secret_name } => {
                write!(f, "{kind} secret {secret_name:?} not found")
            }
            Deferral::DexClientSecretUnavailable => {
                f.write_str("Dex client secret is not available yet")
            }
        }
    }
}

#[derive(Default)]
struct Prerequisites(BTreeMap<SecretKind, Secret>);

impl Prerequisites {
    fn require(&self, kind: SecretKind) -> Result<&Secret> {
        self.0.get(&kind).context(MissingPrerequisiteSnafu { kind })
    }
}

/// Runs every step of [`RECONCILE_ORDER`] once and reports what each one did.
pub async fn reconcile_secrets<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
) -> Result<Vec<(SecretKind, Outcome)>> {
    let mut outcomes = Vec::with_capacity(RECONCILE_ORDER.len());
    for kind in RECONCILE_ORDER {
        let outcome = reconcile_step(ctx, kind).await?;
        match &outcome {
            Outcome::Deferred(deferral) => tracing::info!(
                %kind,
                secret_name = kind.secret_name(ctx.argocd),
                %deferral,
                "Waiting before reconciling secret"
            ),
            outcome => tracing::debug!(%kind, ?outcome, "Reconciled secret"),
        }
        outcomes.push((kind, outcome));
    }
    Ok(outcomes)
}

async fn reconcile_step<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
    kind: SecretKind,
) -> Result<Outcome> {
    if !kind.enabled(ctx.argocd) {
        return Ok(Outcome::Skipped);
    }

    let mut prerequisites = Prerequisites::default();
    for &prerequisite in kind.prerequisites() {
        let secret_name = prerequisite.secret_name(ctx.argocd);
        match ctx
            .store
            .get::<Secret>(ctx.namespace, &secret_name)
            .await
            .context(FetchPrerequisiteSnafu {
                kind: prerequisite,
                secret_name: &secret_name,
            })? {
            Some(secret) => {
                prerequisites.0.insert(prerequisite, secret);
            }
            None => {
                return Ok(Outcome::Deferred(Deferral::MissingPrerequisite {
                    kind: prerequisite,
                    secret_name,
                }))
            }
        }
    }

    match kind {
        SecretKind::ClusterAdmin => cluster::reconcile_cluster_admin_secret(ctx)
            .await
            .context(ClusterAdminSnafu),
        SecretKind::CertificateAuthority => cluster::reconcile_ca_secret(ctx)
            .await
            .context(CertificateAuthoritySnafu),
        SecretKind::LeafTls => {
            let ca_secret = prerequisites.require(SecretKind::CertificateAuthority)?;
            cluster::reconcile_tls_secret(ctx, ca_secret)
                .await
                .context(LeafTlsSnafu)
        }
        SecretKind::ClusterPermissions => permissions::reconcile_cluster_permissions_secret(ctx)
            .await
            .context(ClusterPermissionsSnafu),
        SecretKind::DashboardCredentials => dashboard::reconcile_dashboard_secret(
            ctx,
            prerequisites.require(SecretKind::ClusterAdmin)?,
        )
        .await
        .context(DashboardCredentialsSnafu),
        SecretKind::CompositeCredentials => argocd_secret::reconcile_argocd_secret(
            ctx,
            prerequisites.require(SecretKind::ClusterAdmin)?,
            prerequisites.require(SecretKind::LeafTls)?,
        )
        .await
        .context(CompositeCredentialsSnafu),
    }
}
