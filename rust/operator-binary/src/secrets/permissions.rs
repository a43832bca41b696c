//! The cluster permissions descriptor: which namespaces the in-cluster target of an
//! instance may manage. Recomputed from the live namespace listing on every pass.

use std::collections::{BTreeMap, BTreeSet};

use snafu::{ResultExt, Snafu};
use stackable_operator::{k8s_openapi::api::core::v1::Secret, kube::ResourceExt};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    context::ReconcileContext,
    crd::{
        IN_CLUSTER_NAME, IN_CLUSTER_SERVER, KEY_CLUSTER_CONFIG, KEY_CLUSTER_NAME,
        KEY_CLUSTER_NAMESPACES, KEY_CLUSTER_SERVER, LABEL_MANAGED_BY_NAMESPACE,
        LABEL_SECRET_TYPE, SECRET_TYPE_CLUSTER,
    },
    rollout::RolloutTrigger,
    secrets::{
        meta::{build_secret, bytes, create_if_absent, secret_field, SecretData},
        Outcome,
    },
    store::{self, ObjectStore},
};

const IN_CLUSTER_CONFIG: &str = r#"{"tlsClientConfig":{"insecure":false}}"#;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("failed to list namespaces managed by {namespace:?}"))]
    ListManagedNamespaces {
        source: store::Error,
        namespace: String,
    },

    #[snafu(display("failed to list cluster secrets"))]
    ListClusterSecrets { source: store::Error },

    #[snafu(display("failed to update cluster secret {secret_name:?}"))]
    UpdateClusterSecret {
        source: store::Error,
        secret_name: String,
    },

    #[snafu(display("failed to build secret"))]
    BuildSecret { source: super::meta::Error },

    #[snafu(display("failed to store secret"))]
    StoreSecret { source: super::meta::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

pub async fn reconcile_cluster_permissions_secret<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
) -> Result<Outcome> {
    let managed_namespaces = ctx
        .store
        .list_namespaces(&BTreeMap::from([(
            LABEL_MANAGED_BY_NAMESPACE.to_owned(),
            ctx.namespace.to_owned(),
        )]))
        .await
        .context(ListManagedNamespacesSnafu {
            namespace: ctx.namespace,
        })?;
    let namespaces = merge_namespaces(
        "",
        managed_namespaces
            .iter()
            .map(String::as_str)
            .chain([ctx.namespace]),
    );
    let cluster_config_instance = ctx.config.is_cluster_config_namespace(ctx.namespace);

    let cluster_secrets = ctx
        .store
        .list::<Secret>(
            ctx.namespace,
            &BTreeMap::from([(
                LABEL_SECRET_TYPE.to_owned(),
                SECRET_TYPE_CLUSTER.to_owned(),
            )]),
        )
        .await
        .context(ListClusterSecretsSnafu)?;

    // A descriptor for the in-cluster target already exists (ours, or one another
    // descriptor shares), so merge into it instead of creating a second one.
    if let Some(mut in_cluster) = cluster_secrets.into_iter().find(|secret| {
        secret_field(secret, KEY_CLUSTER_SERVER) == Some(IN_CLUSTER_SERVER.as_bytes())
    }) {
        let data = in_cluster.data.get_or_insert_with(BTreeMap::new);
        let changed = if cluster_config_instance {
            data.remove(KEY_CLUSTER_NAMESPACES).is_some()
        } else {
            let current = data
                .get(KEY_CLUSTER_NAMESPACES)
                .map(|value| String::from_utf8_lossy(&value.0).into_owned())
                .unwrap_or_default();
            let merged = merge_namespaces(&current, namespaces.split(','));
            if merged == current {
                false
            } else {
                data.insert(KEY_CLUSTER_NAMESPACES.to_owned(), bytes(merged));
                true
            }
        };

        if !changed {
            return Ok(Outcome::Unchanged);
        }
        tracing::info!(
            secret_name = in_cluster.name_any(),
            cluster_config_instance,
            "Updating namespaces of in-cluster permissions descriptor"
        );
        ctx.store
            .update(&in_cluster)
            .await
            .context(UpdateClusterSecretSnafu {
                secret_name: in_cluster.name_any(),
            })?;
        return Ok(Outcome::Applied);
    }

    if cluster_config_instance {
        // Cluster-config instances may manage every namespace, there is nothing to restrict.
        return Ok(Outcome::Unchanged);
    }

    let data = SecretData::from([
        (KEY_CLUSTER_CONFIG.to_owned(), bytes(IN_CLUSTER_CONFIG)),
        (KEY_CLUSTER_NAME.to_owned(), bytes(IN_CLUSTER_NAME)),
        (KEY_CLUSTER_SERVER.to_owned(), bytes(IN_CLUSTER_SERVER)),
        (KEY_CLUSTER_NAMESPACES.to_owned(), bytes(namespaces)),
    ]);
    let mut secret = build_secret(
        ctx.argocd,
        &ctx.argocd.cluster_permissions_secret_name(),
        None,
        data,
    )
    .context(BuildSecretSnafu)?;
    secret.labels_mut().insert(
        LABEL_SECRET_TYPE.to_owned(),
        SECRET_TYPE_CLUSTER.to_owned(),
    );
    create_if_absent(ctx.store, &secret)
        .await
        .context(StoreSecretSnafu)
}

/// Unions a comma separated namespace list with further namespaces. Entries are
/// trimmed, blanks dropped, and the result deduplicated and sorted.
pub fn merge_namespaces<'a>(
    existing: &'a str,
    additional: impl IntoIterator<Item = &'a str>,
) -> String {
    existing
        .split(',')
        .chain(additional)
        .map(str::trim)
        .filter(|namespace| !namespace.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>()
        .join(",")
}
