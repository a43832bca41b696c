use std::collections::BTreeMap;

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    builder::meta::ObjectMetaBuilder,
    k8s_openapi::{api::core::v1::Secret, ByteString},
    kube::ResourceExt,
};
use strum::{EnumDiscriminants, IntoStaticStr};

use crate::{
    crd::{ArgoCd, APP_NAME, LABEL_APP_MANAGED_BY, LABEL_APP_NAME, LABEL_APP_PART_OF},
    secrets::Outcome,
    store::{self, ObjectStore},
};

pub const SECRET_TYPE_TLS: &str = "kubernetes.io/tls";
pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("object is missing metadata to build owner reference"))]
    ObjectMissingMetadataForOwnerRef {
        source: stackable_operator::builder::meta::Error,
    },

    #[snafu(display("failed to create secret {secret_name:?}"))]
    CreateSecret {
        source: store::Error,
        secret_name: String,
    },
}

pub type SecretData = BTreeMap<String, ByteString>;

/// Builds a secret owned by `argocd`, so it is garbage collected together with the instance.
pub fn build_secret(
    argocd: &ArgoCd,
    name: &str,
    secret_type: Option<&str>,
    data: SecretData,
) -> Result<Secret, Error> {
    let mut metadata = ObjectMetaBuilder::new()
        .name(name)
        .namespace_opt(argocd.namespace())
        .ownerreference_from_resource(argocd, None, Some(true))
        .context(ObjectMissingMetadataForOwnerRefSnafu)?
        .build();
    metadata.labels = Some(default_labels(argocd, name));

    Ok(Secret {
        metadata,
        type_: secret_type.map(ToOwned::to_owned),
        data: Some(data),
        ..Secret::default()
    })
}

pub fn default_labels(argocd: &ArgoCd, name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (LABEL_APP_NAME.to_owned(), name.to_owned()),
        (LABEL_APP_PART_OF.to_owned(), APP_NAME.to_owned()),
        (LABEL_APP_MANAGED_BY.to_owned(), argocd.name_any()),
    ])
}

/// Creates the secret unless somebody else created it first, which counts as success.
pub async fn create_if_absent<S: ObjectStore>(
    store: &S,
    secret: &Secret,
) -> Result<Outcome, Error> {
    match store.create(secret).await {
        Ok(()) => {
            tracing::info!(secret_name = secret.name_any(), "Created secret");
            Ok(Outcome::Applied)
        }
        Err(store::Error::AlreadyExists { .. }) => {
            tracing::debug!(
                secret_name = secret.name_any(),
                "Secret was created concurrently, keeping the existing one"
            );
            Ok(Outcome::Unchanged)
        }
        Err(source) => Err(source).context(CreateSecretSnafu {
            secret_name: secret.name_any(),
        }),
    }
}

pub fn secret_field<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|value| value.0.as_slice())
}

pub fn bytes(value: impl Into<Vec<u8>>) -> ByteString {
    ByteString(value.into())
}
