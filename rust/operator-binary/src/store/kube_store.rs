use std::collections::BTreeMap;

use serde_json::json;
use snafu::ResultExt;
use stackable_operator::{
    k8s_openapi::api::core::v1::Namespace,
    kube::{
        self,
        api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
        ResourceExt,
    },
};

use super::{
    label_selector, object_key, AlreadyExistsSnafu, ConflictSnafu, Error, KubeSnafu,
    NotFoundSnafu, ObjectStore, Result, SerializeObjectSnafu, StoreObject,
};

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeStore {
    client: kube::Client,
}

impl KubeStore {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K: StoreObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

fn list_params(labels: &BTreeMap<String, String>) -> ListParams {
    let params = ListParams::default();
    if labels.is_empty() {
        params
    } else {
        params.labels(&label_selector(labels))
    }
}

/// Translates API server rejections into the store's error kinds.
fn store_error<K: StoreObject>(source: kube::Error, namespace: &str, name: &str) -> Error {
    let kind = K::kind(&()).into_owned();
    let rejection = match &source {
        kube::Error::Api(response) => Some((response.code, response.reason.clone())),
        _ => None,
    };

    match rejection {
        Some((404, _)) => NotFoundSnafu {
            kind,
            namespace,
            name,
        }
        .build(),
        Some((409, reason)) if reason == "AlreadyExists" => AlreadyExistsSnafu {
            kind,
            namespace,
            name,
        }
        .build(),
        Some((409, _)) => ConflictSnafu {
            kind,
            namespace,
            name,
        }
        .build(),
        _ => Error::Kube {
            source,
            kind,
            namespace: namespace.to_owned(),
            name: name.to_owned(),
        },
    }
}

impl ObjectStore for KubeStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|source| store_error::<K>(source, namespace, name))
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<K>> {
        let objects = self
            .api::<K>(namespace)
            .list(&list_params(labels))
            .await
            .map_err(|source| store_error::<K>(source, namespace, ""))?;
        Ok(objects.items)
    }

    async fn list_namespaces(&self, labels: &BTreeMap<String, String>) -> Result<Vec<String>> {
        let namespaces = Api::<Namespace>::all(self.client.clone())
            .list(&list_params(labels))
            .await
            .context(KubeSnafu {
                kind: "Namespace",
                namespace: "",
                name: "",
            })?;
        Ok(namespaces.items.iter().map(|ns| ns.name_any()).collect())
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<()> {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(&namespace)
            .create(&PostParams::default(), obj)
            .await
            .map_err(|source| store_error::<K>(source, &namespace, &name))?;
        Ok(())
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<()> {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(&namespace)
            .replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|source| store_error::<K>(source, &namespace, &name))?;
        Ok(())
    }

    async fn update_status<K: StoreObject>(&self, obj: &K) -> Result<K> {
        let (namespace, name) = object_key(obj)?;
        let status = serde_json::to_value(obj)
            .context(SerializeObjectSnafu {
                kind: K::kind(&()).into_owned(),
            })?
            .get("status")
            .cloned()
            .unwrap_or_default();
        // Carrying the version token makes the API server reject stale status writes.
        let patch = json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        self.api::<K>(&namespace)
            .patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|source| store_error::<K>(source, &namespace, &name))
    }

    async fn delete<K: StoreObject>(&self, obj: &K) -> Result<()> {
        let (namespace, name) = object_key(obj)?;
        self.api::<K>(&namespace)
            .delete(&name, &DeleteParams::default())
            .await
            .map_err(|source| store_error::<K>(source, &namespace, &name))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use stackable_operator::{k8s_openapi::api::core::v1::Secret, kube::core::ErrorResponse};

    use super::*;
    use crate::store::ErrorDiscriminants;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_owned(),
            message: format!("request rejected with {reason}"),
            reason: reason.to_owned(),
            code,
        })
    }

    #[rstest]
    #[case(404, "NotFound", ErrorDiscriminants::NotFound)]
    #[case(409, "AlreadyExists", ErrorDiscriminants::AlreadyExists)]
    #[case(409, "Conflict", ErrorDiscriminants::Conflict)]
    #[case(500, "InternalError", ErrorDiscriminants::Kube)]
    #[case(422, "Invalid", ErrorDiscriminants::Kube)]
    fn test_api_rejections_map_to_store_errors(
        #[case] code: u16,
        #[case] reason: &str,
        #[case] expected: ErrorDiscriminants,
    ) {
        let error = store_error::<Secret>(api_error(code, reason), "argocd", "argocd-secret");

        assert_eq!(ErrorDiscriminants::from(&error), expected);
    }

    #[test]
    fn test_rejection_keeps_object_identity() {
        let error = store_error::<Secret>(api_error(409, "Conflict"), "argocd", "argocd-secret");

        match error {
            Error::Conflict {
                kind,
                namespace,
                name,
            } => {
                assert_eq!(kind, "Secret");
                assert_eq!(namespace, "argocd");
                assert_eq!(name, "argocd-secret");
            }
            other => panic!("expected a conflict, got {other:?}"),
        }
    }
}
