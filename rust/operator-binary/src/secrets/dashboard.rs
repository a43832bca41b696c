//! Dashboard (Grafana) admin credentials, mirrored from the cluster admin secret.

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::core::v1::{ConfigMap, Secret},
    kube::ResourceExt,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    context::ReconcileContext,
    credentials::password,
    crd::{
        DEFAULT_GRAFANA_ADMIN_USERNAME, KEY_ADMIN_PASSWORD, KEY_GRAFANA_ADMIN_PASSWORD,
        KEY_GRAFANA_ADMIN_USERNAME, KEY_GRAFANA_SECRET_KEY,
    },
    rollout::{self, RolloutTarget, RolloutTrigger},
    secrets::{
        meta::{build_secret, bytes, create_if_absent, secret_field, SecretData},
        Outcome,
    },
    store::{self, ObjectStore},
};

pub const ADMIN_PASSWORD_CHANGED_REASON: &str = "admin.password.changed";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to retrieve secret {secret_name:?}"))]
    RetrieveSecret {
        source: store::Error,
        secret_name: String,
    },

    #[snafu(display("failed to update secret {secret_name:?}"))]
    UpdateSecret {
        source: store::Error,
        secret_name: String,
    },

    #[snafu(display("failed to generate dashboard secret key"))]
    GenerateSecretKey { source: password::Error },

    #[snafu(display("failed to build secret"))]
    BuildSecret { source: super::meta::Error },

    #[snafu(display("failed to store secret"))]
    StoreSecret { source: super::meta::Error },

    #[snafu(display("failed to clear dashboard configuration {config_map_name:?}"))]
    ClearDashboardConfig {
        source: store::Error,
        config_map_name: String,
    },

    #[snafu(display("failed to restart dashboard"))]
    RestartDashboard { source: rollout::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub async fn reconcile_dashboard_secret<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
    cluster_secret: &Secret,
) -> Result<Outcome> {
    let admin_password = secret_field(cluster_secret, KEY_ADMIN_PASSWORD).unwrap_or_default();
    let secret_name = ctx.argocd.grafana_secret_name();

    let Some(mut secret) = ctx
        .store
        .get::<Secret>(ctx.namespace, &secret_name)
        .await
        .context(RetrieveSecretSnafu {
            secret_name: &secret_name,
        })?
    else {
        let secret_key = password::generate_session_key().context(GenerateSecretKeySnafu)?;
        let data = SecretData::from([
            (
                KEY_GRAFANA_ADMIN_USERNAME.to_owned(),
                bytes(DEFAULT_GRAFANA_ADMIN_USERNAME),
            ),
            (KEY_GRAFANA_ADMIN_PASSWORD.to_owned(), bytes(admin_password)),
            (KEY_GRAFANA_SECRET_KEY.to_owned(), bytes(secret_key)),
        ]);
        let secret =
            build_secret(ctx.argocd, &secret_name, None, data).context(BuildSecretSnafu)?;
        return create_if_absent(ctx.store, &secret)
            .await
            .context(StoreSecretSnafu);
    };

    if secret_field(&secret, KEY_GRAFANA_ADMIN_PASSWORD) == Some(admin_password) {
        return Ok(Outcome::Unchanged);
    }

    tracing::info!(
        secret_name,
        "Cluster admin password changed, updating dashboard credentials"
    );
    secret
        .data
        .get_or_insert_with(Default::default)
        .insert(KEY_GRAFANA_ADMIN_PASSWORD.to_owned(), bytes(admin_password));
    ctx.store
        .update(&secret)
        .await
        .context(UpdateSecretSnafu {
            secret_name: &secret_name,
        })?;

    clear_dashboard_cache(ctx).await?;
    Ok(Outcome::Applied)
}

/// Drops the rendered dashboard configuration, which caches the old admin
/// password, and restarts the dashboard so it renders a fresh one.
async fn clear_dashboard_cache<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
) -> Result<()> {
    let config_map_name = ctx.argocd.grafana_config_map_name();
    match ctx
        .store
        .get::<ConfigMap>(ctx.namespace, &config_map_name)
        .await
        .context(ClearDashboardConfigSnafu {
            config_map_name: &config_map_name,
        })? {
        Some(config_map) => match ctx.store.delete(&config_map).await {
            Ok(()) | Err(store::Error::NotFound { .. }) => {}
            Err(source) => {
                return Err(source).context(ClearDashboardConfigSnafu {
                    config_map_name: config_map.name_any(),
                })
            }
        },
        None => tracing::info!(config_map_name, "Dashboard configuration not found"),
    }

    ctx.rollout
        .restart(
            ctx.namespace,
            &RolloutTarget::deployment(ctx.argocd.name_with_suffix("grafana")),
            ADMIN_PASSWORD_CHANGED_REASON,
        )
        .await
        .context(RestartDashboardSnafu)
}
