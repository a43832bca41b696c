//! The independent root secrets of an instance: the cluster admin password, the
//! self-signed CA and the leaf certificate that CA signs.
//!
//! All three are created once. Rotating one means deleting it; the next pass
//! regenerates it.

use snafu::{ResultExt, Snafu};
use stackable_operator::{k8s_openapi::api::core::v1::Secret, kube::ResourceExt};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    context::ReconcileContext,
    credentials::{
        certificate::{self, CertificateBundle, LeafSubject},
        password,
    },
    crd::{ArgoCd, KEY_ADMIN_PASSWORD},
    rollout::RolloutTrigger,
    secrets::{
        meta::{
            build_secret, bytes, create_if_absent, secret_field, SecretData, CA_CERT_KEY,
            SECRET_TYPE_TLS, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY,
        },
        Outcome,
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

    #[snafu(display("failed to generate admin password"))]
    GeneratePassword { source: password::Error },

    #[snafu(display("failed to generate certificate authority"))]
    GenerateCa { source: certificate::Error },

    #[snafu(display("failed to load certificate authority from secret {secret_name:?}"))]
    LoadCa {
        source: certificate::Error,
        secret_name: String,
    },

    #[snafu(display("failed to generate TLS certificate"))]
    GenerateCertificate { source: certificate::Error },

    #[snafu(display("failed to build secret"))]
    BuildSecret { source: super::meta::Error },

    #[snafu(display("failed to store secret"))]
    StoreSecret { source: super::meta::Error },
}

type Result<T, E = Error> = std::result::Result<T, E>;

async fn exists<S: ObjectStore>(store: &S, namespace: &str, secret_name: &str) -> Result<bool> {
    Ok(store
        .get::<Secret>(namespace, secret_name)
        .await
        .context(RetrieveSecretSnafu { secret_name })?
        .is_some())
}

pub async fn reconcile_cluster_admin_secret<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
) -> Result<Outcome> {
    let secret_name = ctx.argocd.cluster_secret_name();
    if exists(ctx.store, ctx.namespace, &secret_name).await? {
        return Ok(Outcome::Unchanged);
    }

    let admin_password = password::generate_password().context(GeneratePasswordSnafu)?;
    let data = SecretData::from([(KEY_ADMIN_PASSWORD.to_owned(), bytes(admin_password))]);
    let secret = build_secret(ctx.argocd, &secret_name, None, data).context(BuildSecretSnafu)?;
    create_if_absent(ctx.store, &secret)
        .await
        .context(StoreSecretSnafu)
}

pub async fn reconcile_ca_secret<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
) -> Result<Outcome> {
    let secret_name = ctx.argocd.ca_secret_name();
    if exists(ctx.store, ctx.namespace, &secret_name).await? {
        return Ok(Outcome::Unchanged);
    }

    let ca = certificate::generate_self_signed_ca(&ctx.argocd.name_any())
        .context(GenerateCaSnafu)?;
    let certificate_pem = ca.certificate_pem().context(GenerateCaSnafu)?;
    // The CA certificate is published both as the serving and as the root certificate.
    let data = SecretData::from([
        (TLS_CERT_KEY.to_owned(), bytes(certificate_pem.clone())),
        (CA_CERT_KEY.to_owned(), bytes(certificate_pem)),
        (
            TLS_PRIVATE_KEY_KEY.to_owned(),
            bytes(ca.private_key_pem().context(GenerateCaSnafu)?),
        ),
    ]);
    let secret = build_secret(ctx.argocd, &secret_name, Some(SECRET_TYPE_TLS), data)
        .context(BuildSecretSnafu)?;
    create_if_absent(ctx.store, &secret)
        .await
        .context(StoreSecretSnafu)
}

pub async fn reconcile_tls_secret<S: ObjectStore, R: RolloutTrigger>(
    ctx: &ReconcileContext<'_, S, R>,
    ca_secret: &Secret,
) -> Result<Outcome> {
    let secret_name = ctx.argocd.tls_secret_name();
    if exists(ctx.store, ctx.namespace, &secret_name).await? {
        return Ok(Outcome::Unchanged);
    }

    let ca = CertificateBundle::from_pem(
        secret_field(ca_secret, TLS_CERT_KEY).unwrap_or_default(),
        secret_field(ca_secret, TLS_PRIVATE_KEY_KEY).unwrap_or_default(),
    )
    .context(LoadCaSnafu {
        secret_name: ca_secret.name_any(),
    })?;
    let subject = LeafSubject {
        common_name: secret_name.clone(),
        organization: ctx.namespace.to_owned(),
    };
    let leaf = certificate::generate_signed_leaf(&subject, &leaf_dns_names(ctx.argocd), &ca)
        .context(GenerateCertificateSnafu)?;

    let data = SecretData::from([
        (
            TLS_CERT_KEY.to_owned(),
            bytes(leaf.certificate_pem().context(GenerateCertificateSnafu)?),
        ),
        (
            TLS_PRIVATE_KEY_KEY.to_owned(),
            bytes(leaf.private_key_pem().context(GenerateCertificateSnafu)?),
        ),
    ]);
    let secret = build_secret(ctx.argocd, &secret_name, Some(SECRET_TYPE_TLS), data)
        .context(BuildSecretSnafu)?;
    create_if_absent(ctx.store, &secret)
        .await
        .context(StoreSecretSnafu)
}

/// DNS names the leaf certificate is valid for: the instance, its gRPC endpoint,
/// its in-cluster Service name, and every enabled sub-component.
pub fn leaf_dns_names(argocd: &ArgoCd) -> Vec<String> {
    let name = argocd.name_any();
    let mut dns_names = vec![
        name.clone(),
        argocd.name_with_suffix("grpc"),
        format!(
            "{name}.{namespace}.svc.cluster.local",
            namespace = argocd.namespace().unwrap_or_default()
        ),
    ];
    if argocd.spec.grafana.enabled {
        dns_names.push(argocd.grafana_host());
    }
    if argocd.spec.prometheus.enabled {
        dns_names.push(argocd.prometheus_host());
    }
    dns_names
}
