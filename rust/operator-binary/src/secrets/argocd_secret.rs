//! The composite credential bundle (`argocd-secret`) the Argo CD server reads.
//!
//! It is assembled once from the cluster admin secret and the leaf TLS secret.
//! Afterwards only the fields whose sources changed are rewritten, in a single
//! update, so repeated passes with unchanged inputs issue no writes at all.

use chrono::{DateTime, SecondsFormat, Utc};
use snafu::{ResultExt, Snafu};
use stackable_operator::k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    context::ReconcileContext,
    credentials::password,
    crd::{
        ArgoCd, ARGOCD_SECRET_NAME, KEY_ADMIN_PASSWORD, KEY_ADMIN_PASSWORD_MTIME,
        KEY_DEX_CLIENT_SECRET, KEY_SERVER_SECRET_KEY, KEY_SERVICE_ACCOUNT_TOKEN,
    },
    rollout::RolloutTrigger,
    secrets::{
        meta::{
            build_secret, bytes, create_if_absent, secret_field, SecretData, TLS_CERT_KEY,
            TLS_PRIVATE_KEY_KEY,
        },
        Deferral, Outcome,
    },
    store::{self, ObjectStore},
};

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to retrieve secret {secret_name:?}"))]
    RetrieveSecret {
        source: store::Error,
        secret_name: String,
    },

    #[snafu(display("failed to retrieve service account {service_account:?}"))]
    RetrieveServiceAccount {
        source: store::Error,
        service_account: String,
    },

    #[snafu(display("failed to hash admin password"))]
    HashAdminPassword { source: password::Error },

    #[snafu(display("failed to generate session key"))]
    GenerateSessionKey { source: password::Error },

    #[snafu(display("failed to build secret"))]
    BuildSecret { source: super::meta::Error },

    #[snafu(display("failed to store secret"))]
    StoreSecret { source: super::meta::Error },

    #[snafu(display("failed to update secret {secret_name:?}"))]
    UpdateSecret {
        source: store::Error,
        secret_name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// A field group of the composite bundle that was rewritten.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delta {
    SessionKey,
    AdminPassword,
    Tls,
    DexClientSecret,
}

/// Current values of everything the composite bundle is derived from.
#[derive(Debug)]
pub struct BundleSources<'a> {
    /// Plaintext admin password. `None` if the cluster admin secret lacks the field.
    pub admin_password: Option<&'a [u8]>,
    pub tls_certificate: &'a [u8],
    pub tls_private_key: &'a [u8],
    /// `None` if SSO is not backed by Dex, or its client secret is not available yet.
    pub dex_client_secret: Option<&'a [u8]>,
}

impl<'a> BundleSources<'a> {
    pub fn new(
        cluster_secret: &'a Secret,
        tls_secret: &'a Secret,
        dex_client_secret: Option<&'a [u8]>,
    ) -> Self {
        Self {
            admin_password: secret_field(cluster_secret, KEY_ADMIN_PASSWORD),
            tls_certificate: secret_field(tls_secret, TLS_CERT_KEY).unwrap_or_default(),
            tls_private_key: secret_field(tls_secret, TLS_PRIVATE_KEY_KEY).unwrap_or_default(),
            dex_client_secret,
        }
    }
}

pub async fn reconcile_argocd_secret<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
    cluster_secret: &Secret,
    tls_secret: &Secret,
) -> Result<Outcome> {
    let dex_client_secret = if ctx.argocd.sso_uses_dex() {
        fetch_dex_client_secret(ctx.store, ctx.argocd, ctx.namespace).await?
    } else {
        None
    };
    let sources = BundleSources::new(cluster_secret, tls_secret, dex_client_secret.as_deref());

    let existing = ctx
        .store
        .get::<Secret>(ctx.namespace, ARGOCD_SECRET_NAME)
        .await
        .context(RetrieveSecretSnafu {
            secret_name: ARGOCD_SECRET_NAME,
        })?;

    match existing {
        Some(secret) => update_existing(ctx, secret, &sources).await,
        None if ctx.argocd.sso_uses_dex() && sources.dex_client_secret.is_none() => {
            Ok(Outcome::Deferred(Deferral::DexClientSecretUnavailable))
        }
        None => {
            let data = initial_data(&sources, ctx.config.password_hash_cost, Utc::now())?;
            let secret = build_secret(ctx.argocd, ARGOCD_SECRET_NAME, None, data)
                .context(BuildSecretSnafu)?;
            create_if_absent(ctx.store, &secret)
                .await
                .context(StoreSecretSnafu)
        }
    }
}

async fn update_existing<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
    mut secret: Secret,
    sources: &BundleSources<'_>,
) -> Result<Outcome> {
    let deltas = apply_deltas(
        secret.data.get_or_insert_with(Default::default),
        sources,
        ctx.config.password_hash_cost,
        Utc::now(),
    )?;
    if deltas.is_empty() {
        return Ok(Outcome::Unchanged);
    }

    tracing::info!(
        secret_name = ARGOCD_SECRET_NAME,
        ?deltas,
        "Updating composite credential bundle"
    );
    ctx.store
        .update(&secret)
        .await
        .context(UpdateSecretSnafu {
            secret_name: ARGOCD_SECRET_NAME,
        })?;
    Ok(Outcome::Applied)
}

fn initial_data(sources: &BundleSources<'_>, cost: u32, now: DateTime<Utc>) -> Result<SecretData> {
    let admin_password_hash =
        password::hash_password(sources.admin_password.unwrap_or_default(), cost)
            .context(HashAdminPasswordSnafu)?;
    let session_key = password::generate_session_key().context(GenerateSessionKeySnafu)?;

    let mut data = SecretData::from([
        (KEY_ADMIN_PASSWORD.to_owned(), bytes(admin_password_hash)),
        (KEY_ADMIN_PASSWORD_MTIME.to_owned(), bytes(password_mtime(now))),
        (KEY_SERVER_SECRET_KEY.to_owned(), bytes(session_key)),
        (TLS_CERT_KEY.to_owned(), bytes(sources.tls_certificate)),
        (TLS_PRIVATE_KEY_KEY.to_owned(), bytes(sources.tls_private_key)),
    ]);
    if let Some(dex_client_secret) = sources.dex_client_secret {
        data.insert(KEY_DEX_CLIENT_SECRET.to_owned(), bytes(dex_client_secret));
    }
    Ok(data)
}

/// Brings `data` in line with `sources`, touching only the fields that differ.
/// Returns which field groups were rewritten.
pub fn apply_deltas(
    data: &mut SecretData,
    sources: &BundleSources<'_>,
    cost: u32,
    now: DateTime<Utc>,
) -> Result<Vec<Delta>> {
    let field = |data: &SecretData, key: &str| data.get(key).map(|value| value.0.clone());
    let mut deltas = Vec::new();

    if !data.contains_key(KEY_SERVER_SECRET_KEY) {
        let session_key = password::generate_session_key().context(GenerateSessionKeySnafu)?;
        data.insert(KEY_SERVER_SECRET_KEY.to_owned(), bytes(session_key));
        deltas.push(Delta::SessionKey);
    }

    if let Some(admin_password) = sources.admin_password {
        let stored_hash = field(data, KEY_ADMIN_PASSWORD).unwrap_or_default();
        if !password::verify_password(admin_password, &stored_hash) {
            tracing::info!("Admin password has changed");
            let hash =
                password::hash_password(admin_password, cost).context(HashAdminPasswordSnafu)?;
            data.insert(KEY_ADMIN_PASSWORD.to_owned(), bytes(hash));
            data.insert(KEY_ADMIN_PASSWORD_MTIME.to_owned(), bytes(password_mtime(now)));
            deltas.push(Delta::AdminPassword);
        }
    }

    if field(data, TLS_CERT_KEY).as_deref() != Some(sources.tls_certificate)
        || field(data, TLS_PRIVATE_KEY_KEY).as_deref() != Some(sources.tls_private_key)
    {
        tracing::info!("TLS material has changed");
        data.insert(TLS_CERT_KEY.to_owned(), bytes(sources.tls_certificate));
        data.insert(TLS_PRIVATE_KEY_KEY.to_owned(), bytes(sources.tls_private_key));
        deltas.push(Delta::Tls);
    }

    if let Some(dex_client_secret) = sources.dex_client_secret {
        if field(data, KEY_DEX_CLIENT_SECRET).as_deref() != Some(dex_client_secret) {
            data.insert(KEY_DEX_CLIENT_SECRET.to_owned(), bytes(dex_client_secret));
            deltas.push(Delta::DexClientSecret);
        }
    }

    Ok(deltas)
}

fn password_mtime(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Reads the Dex OAuth client secret from the token secret of the Dex service
/// account. Returns `None` while the service account or its token does not exist.
pub async fn fetch_dex_client_secret<S: ObjectStore>(
    store: &S,
    argocd: &ArgoCd,
    namespace: &str,
) -> Result<Option<Vec<u8>>> {
    let service_account_name = argocd.dex_service_account_name();
    let Some(service_account) = store
        .get::<ServiceAccount>(namespace, &service_account_name)
        .await
        .context(RetrieveServiceAccountSnafu {
            service_account: &service_account_name,
        })?
    else {
        tracing::debug!(service_account = service_account_name, "Dex service account not found");
        return Ok(None);
    };

    let Some(token_secret_name) = service_account
        .secrets
        .iter()
        .flatten()
        .filter_map(|reference| reference.name.as_deref())
        .find(|name| name.contains("token"))
    else {
        tracing::debug!(
            service_account = service_account_name,
            "Dex service account references no token secret"
        );
        return Ok(None);
    };

    let token_secret = store
        .get::<Secret>(namespace, token_secret_name)
        .await
        .context(RetrieveSecretSnafu {
            secret_name: token_secret_name,
        })?;
    Ok(token_secret
        .as_ref()
        .and_then(|secret| secret_field(secret, KEY_SERVICE_ACCOUNT_TOKEN))
        .map(ToOwned::to_owned))
}
