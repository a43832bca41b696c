//! Abstract view of the declarative object store.
//!
//! The reconciler only ever talks to the cluster through [`ObjectStore`], so every
//! step can run against [`KubeStore`] in production and an in-memory store in
//! tests. All calls are individually atomic. Optimistic concurrency is carried
//! by `metadata.resourceVersion`; a stale write fails with [`Error::Conflict`].

use std::{collections::BTreeMap, fmt::Debug, future::Future};

use serde::{de::DeserializeOwned, Serialize};
use snafu::Snafu;
use stackable_operator::{
    k8s_openapi::NamespaceResourceScope,
    kube::{self, Resource},
};
use strum::{EnumDiscriminants, IntoStaticStr};

pub use self::kube_store::KubeStore;

mod kube_store;

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("{kind} {namespace}/{name} not found"))]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("{kind} {namespace}/{name} already exists"))]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("{kind} {namespace}/{name} was modified concurrently"))]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("object defines no name"))]
    ObjectHasNoName,

    #[snafu(display("object defines no namespace"))]
    ObjectHasNoNamespace,

    #[snafu(display("failed to serialize {kind}"))]
    SerializeObject {
        source: serde_json::Error,
        kind: String,
    },

    #[snafu(display("request for {kind} {namespace}/{name} failed"))]
    Kube {
        source: kube::Error,
        kind: String,
        namespace: String,
        name: String,
    },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// A conflicting write is resolved by a later pass that re-fetches the object
    /// and recomputes its changes.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

/// Namespaced objects the reconciler reads and writes.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static
{
}

pub trait ObjectStore: Send + Sync {
    /// Returns `None` when the object does not exist.
    fn get<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<K>>> + Send;

    fn list<K: StoreObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Vec<K>>> + Send;

    /// Names of all namespaces carrying every one of the given labels.
    fn list_namespaces(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Fails with [`Error::AlreadyExists`] if an object with the same name exists.
    fn create<K: StoreObject>(&self, obj: &K) -> impl Future<Output = Result<()>> + Send;

    /// Fails with [`Error::Conflict`] if the object carries a stale version token.
    fn update<K: StoreObject>(&self, obj: &K) -> impl Future<Output = Result<()>> + Send;

    /// Writes only the status sub-resource and returns the stored object.
    fn update_status<K: StoreObject>(&self, obj: &K) -> impl Future<Output = Result<K>> + Send;

    fn delete<K: StoreObject>(&self, obj: &K) -> impl Future<Output = Result<()>> + Send;
}

/// Name and namespace of an object about to be written.
pub(crate) fn object_key<K: StoreObject>(obj: &K) -> Result<(String, String)> {
    let meta = obj.meta();
    let namespace = meta.namespace.clone().ok_or(Error::ObjectHasNoNamespace)?;
    let name = meta.name.clone().ok_or(Error::ObjectHasNoName)?;
    Ok((namespace, name))
}

/// Renders labels as an equality-based selector, e.g. `a=b,c=d`.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}
