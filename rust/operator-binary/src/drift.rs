//! Detects changes to TLS secrets managed outside of the operator and restarts
//! the workloads that mount them.
//!
//! The only memory is the fingerprint stored in the instance status. It is
//! written before any restart is triggered, so a failed restart never causes a
//! retrigger loop, and a crash in between at worst causes one redundant rollout.

use openssl::sha::Sha256;
use snafu::{ResultExt, Snafu};
use stackable_operator::{k8s_openapi::api::core::v1::Secret, kube::ResourceExt};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::{
        tls::{REDIS_TLS_SECRET_NAME, REPO_SERVER_TLS_SECRET_NAME},
        ArgoCd, ArgoCdStatus,
    },
    rollout::{self, RolloutTarget, RolloutTrigger},
    secrets::meta::{secret_field, SECRET_TYPE_TLS, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY},
    store::{self, ObjectStore},
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to retrieve TLS secret {secret_name:?}"))]
    RetrieveTlsSecret {
        source: store::Error,
        secret_name: String,
    },

    #[snafu(display("failed to persist fingerprint of {secret_name:?} in status"))]
    PersistFingerprint {
        source: store::Error,
        secret_name: String,
    },

    #[snafu(display("failed to roll out workloads after {secret_name:?} changed"))]
    Rollout {
        source: rollout::Error,
        secret_name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriftState {
    Unchanged,
    Changed,
}

/// An externally managed TLS secret, where its fingerprint lives in the status,
/// and which workloads need a restart when it changes.
pub struct TrackedTlsSecret {
    pub secret_name: &'static str,
    pub reason: &'static str,
    pub checksum: fn(&mut ArgoCdStatus) -> &mut Option<String>,
    pub dependents: Vec<RolloutTarget>,
}

impl TrackedTlsSecret {
    pub fn repo_server(argocd: &ArgoCd) -> Self {
        Self {
            secret_name: REPO_SERVER_TLS_SECRET_NAME,
            reason: "repo.tls.cert.changed",
            checksum: |status| &mut status.repo_tls_checksum,
            dependents: core_workloads(argocd),
        }
    }

    pub fn redis(argocd: &ArgoCd) -> Self {
        let mut dependents = if argocd.spec.ha.enabled {
            vec![
                RolloutTarget::deployment(argocd.name_with_suffix("redis-ha-haproxy")),
                RolloutTarget::recreated_stateful_set(argocd.name_with_suffix("redis-ha-server")),
            ]
        } else {
            vec![RolloutTarget::deployment(argocd.name_with_suffix("redis"))]
        };
        dependents.extend(core_workloads(argocd));
        Self {
            secret_name: REDIS_TLS_SECRET_NAME,
            reason: "redis.tls.cert.changed",
            checksum: |status| &mut status.redis_tls_checksum,
            dependents,
        }
    }
}

/// The API server, the repo-server and the application controller.
fn core_workloads(argocd: &ArgoCd) -> Vec<RolloutTarget> {
    vec![
        RolloutTarget::deployment(argocd.name_with_suffix("server")),
        RolloutTarget::deployment(argocd.name_with_suffix("repo-server")),
        RolloutTarget::stateful_set(argocd.name_with_suffix("application-controller")),
    ]
}

/// Lowercase hex SHA-256 over the certificate followed by the private key.
pub fn fingerprint(certificate: &[u8], private_key: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(certificate);
    hasher.update(private_key);
    hex::encode(hasher.finish())
}

/// Fingerprint of a live secret. `None` if it is absent, not of the TLS type, or
/// lacks the certificate or key.
pub fn live_fingerprint(secret: Option<&Secret>) -> Option<String> {
    let secret = secret?;
    if secret.type_.as_deref() != Some(SECRET_TYPE_TLS) {
        tracing::debug!(
            secret_name = secret.name_any(),
            secret_type = ?secret.type_,
            "Secret is not of the TLS type, ignoring"
        );
        return None;
    }
    Some(fingerprint(
        secret_field(secret, TLS_CERT_KEY)?,
        secret_field(secret, TLS_PRIVATE_KEY_KEY)?,
    ))
}

/// Compares the live fingerprint of `tracked` against the one in the status of
/// `argocd`. On change the new fingerprint is persisted first (and `argocd` is
/// replaced by the stored object), then every dependent is restarted.
pub async fn reconcile_tls_drift<S: ObjectStore, R: RolloutTrigger>(
    argocd: &mut ArgoCd,
    namespace: &str,
    store: &S,
    rollout: &R,
    tracked: &TrackedTlsSecret,
) -> Result<DriftState> {
    let secret = store
        .get::<Secret>(namespace, tracked.secret_name)
        .await
        .context(RetrieveTlsSecretSnafu {
            secret_name: tracked.secret_name,
        })?;
    let Some(live) = live_fingerprint(secret.as_ref()) else {
        return Ok(DriftState::Unchanged);
    };

    let mut status = argocd.status();
    let stored = (tracked.checksum)(&mut status);
    if stored.as_deref() == Some(live.as_str()) {
        return Ok(DriftState::Unchanged);
    }

    tracing::info!(
        secret_name = tracked.secret_name,
        reason = tracked.reason,
        "TLS secret changed, persisting fingerprint"
    );
    *stored = Some(live);
    let mut updated = argocd.clone();
    updated.status = Some(status);
    *argocd = store
        .update_status(&updated)
        .await
        .context(PersistFingerprintSnafu {
            secret_name: tracked.secret_name,
        })?;

    rollout::restart_all(rollout, namespace, &tracked.dependents, tracked.reason)
        .await
        .context(RolloutSnafu {
            secret_name: tracked.secret_name,
        })?;
    Ok(DriftState::Changed)
}
