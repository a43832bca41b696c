//! In-memory stand-ins for the object store and the rollout trigger, plus fixtures.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use stackable_operator::{
    k8s_openapi::{
        api::{
            apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec},
            core::v1::{ConfigMap, Secret},
        },
        ByteString,
    },
    kube::api::ObjectMeta,
};

use crate::{
    config::OperatorConfig,
    context::ReconcileContext,
    crd::{ArgoCd, ArgoCdSpec},
    rollout::{self, RolloutTarget, RolloutTrigger},
    secrets::meta::{SECRET_TYPE_TLS, TLS_CERT_KEY, TLS_PRIVATE_KEY_KEY},
    store::{self, object_key, ObjectStore, StoreObject},
};

pub const NAMESPACE: &str = "argocd";
/// Lowest cost bcrypt accepts, keeps hashing in tests fast.
pub const TEST_HASH_COST: u32 = 4;

type Key = (String, String, String);

fn key<K: StoreObject>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).into_owned(), namespace.to_owned(), name.to_owned())
}

fn labels_match(value: &serde_json::Value, labels: &BTreeMap<String, String>) -> bool {
    labels.iter().all(|(label, expected)| {
        value["metadata"]["labels"][label].as_str() == Some(expected.as_str())
    })
}

/// [`ObjectStore`] backed by a map. Enforces existence and resource version checks
/// like the API server and records every mutating call.
#[derive(Default)]
pub struct InMemoryStore {
    objects: Mutex<BTreeMap<Key, serde_json::Value>>,
    namespaces: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    mutations: Mutex<Vec<String>>,
    failures: Mutex<BTreeSet<(String, String)>>,
    concurrent_writes: Mutex<BTreeSet<(String, String)>>,
    next_version: Mutex<u64>,
}

impl InMemoryStore {
    /// Puts `obj` into the store without recording a mutation.
    pub fn insert<K: StoreObject>(&self, mut obj: K) {
        let (namespace, name) = object_key(&obj).expect("fixture must have name and namespace");
        obj.meta_mut().resource_version = Some(self.bump_version());
        self.objects.lock().unwrap().insert(
            key::<K>(&namespace, &name),
            serde_json::to_value(&obj).unwrap(),
        );
    }

    pub fn get_object<K: StoreObject>(&self, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&key::<K>(NAMESPACE, name))
            .map(|value| serde_json::from_value(value.clone()).unwrap())
    }

    pub fn secret(&self, name: &str) -> Option<Secret> {
        self.get_object(name)
    }

    pub fn add_namespace(&self, name: &str, labels: &[(&str, &str)]) {
        self.namespaces.lock().unwrap().insert(
            name.to_owned(),
            labels
                .iter()
                .map(|(label, value)| (label.to_string(), value.to_string()))
                .collect(),
        );
    }

    /// Every mutating call so far, as `"<verb> <kind> <name>"`.
    pub fn mutations(&self) -> Vec<String> {
        self.mutations.lock().unwrap().clone()
    }

    pub fn mutation_count(&self) -> usize {
        self.mutations.lock().unwrap().len()
    }

    /// Makes every call touching the named object fail with a conflict.
    pub fn fail_on(&self, kind: &str, name: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert((kind.to_owned(), name.to_owned()));
    }

    /// Simulates another writer changing the named object right before our next
    /// update of it, so that update fails on its stale resource version.
    pub fn race_next_update(&self, kind: &str, name: &str) {
        self.concurrent_writes
            .lock()
            .unwrap()
            .insert((kind.to_owned(), name.to_owned()));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    fn bump_version(&self) -> String {
        let mut version = self.next_version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    fn check_failure(&self, (kind, namespace, name): &Key) -> store::Result<()> {
        if self
            .failures
            .lock()
            .unwrap()
            .contains(&(kind.clone(), name.clone()))
        {
            return Err(store::Error::Conflict {
                kind: kind.clone(),
                namespace: namespace.clone(),
                name: name.clone(),
            });
        }
        Ok(())
    }

    fn record(&self, verb: &str, (kind, _, name): &Key) {
        self.mutations
            .lock()
            .unwrap()
            .push(format!("{verb} {kind} {name}"));
    }

    fn write_key<K: StoreObject>(&self, obj: &K) -> store::Result<Key> {
        let (namespace, name) = object_key(obj)?;
        let key = key::<K>(&namespace, &name);
        self.check_failure(&key)?;
        Ok(key)
    }

    /// Looks up the stored version of `key`, enforcing optimistic concurrency.
    fn current_for_write<K: StoreObject>(
        &self,
        objects: &BTreeMap<Key, serde_json::Value>,
        key: &Key,
        obj: &K,
    ) -> store::Result<serde_json::Value> {
        let (kind, namespace, name) = key.clone();
        let current = objects.get(key).cloned().ok_or(store::Error::NotFound {
            kind: kind.clone(),
            namespace: namespace.clone(),
            name: name.clone(),
        })?;
        if let Some(expected) = &obj.meta().resource_version {
            if current["metadata"]["resourceVersion"].as_str() != Some(expected.as_str()) {
                return Err(store::Error::Conflict {
                    kind,
                    namespace,
                    name,
                });
            }
        }
        Ok(current)
    }
}

impl ObjectStore for InMemoryStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> store::Result<Option<K>> {
        let key = key::<K>(namespace, name);
        self.check_failure(&key)?;
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&key)
            .map(|value| serde_json::from_value(value.clone()).unwrap()))
    }

    async fn list<K: StoreObject>(
        &self,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> store::Result<Vec<K>> {
        let kind = K::kind(&());
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((object_kind, object_namespace, _), value)| {
                *object_kind == kind && object_namespace == namespace && labels_match(value, labels)
            })
            .map(|(_, value)| serde_json::from_value(value.clone()).unwrap())
            .collect())
    }

    async fn list_namespaces(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> store::Result<Vec<String>> {
        Ok(self
            .namespaces
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, namespace_labels)| {
                labels
                    .iter()
                    .all(|(label, value)| namespace_labels.get(label) == Some(value))
            })
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> store::Result<()> {
        let key = self.write_key(obj)?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            let (kind, namespace, name) = key;
            return Err(store::Error::AlreadyExists {
                kind,
                namespace,
                name,
            });
        }
        let mut obj = obj.clone();
        obj.meta_mut().resource_version = Some(self.bump_version());
        objects.insert(key.clone(), serde_json::to_value(&obj).unwrap());
        self.record("create", &key);
        Ok(())
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> store::Result<()> {
        let key = self.write_key(obj)?;
        let mut objects = self.objects.lock().unwrap();
        let (kind, _, name) = &key;
        if self
            .concurrent_writes
            .lock()
            .unwrap()
            .remove(&(kind.clone(), name.clone()))
        {
            if let Some(current) = objects.get_mut(&key) {
                current["metadata"]["resourceVersion"] = self.bump_version().into();
            }
        }
        self.current_for_write(&objects, &key, obj)?;
        let mut obj = obj.clone();
        obj.meta_mut().resource_version = Some(self.bump_version());
        objects.insert(key.clone(), serde_json::to_value(&obj).unwrap());
        self.record("update", &key);
        Ok(())
    }

    async fn update_status<K: StoreObject>(&self, obj: &K) -> store::Result<K> {
        let key = self.write_key(obj)?;
        let mut objects = self.objects.lock().unwrap();
        let mut current = self.current_for_write(&objects, &key, obj)?;
        current["status"] = serde_json::to_value(obj).unwrap()["status"].clone();
        current["metadata"]["resourceVersion"] = self.bump_version().into();
        objects.insert(key.clone(), current.clone());
        self.record("update_status", &key);
        Ok(serde_json::from_value(current).unwrap())
    }

    async fn delete<K: StoreObject>(&self, obj: &K) -> store::Result<()> {
        let key = self.write_key(obj)?;
        if self.objects.lock().unwrap().remove(&key).is_none() {
            let (kind, namespace, name) = key;
            return Err(store::Error::NotFound {
                kind,
                namespace,
                name,
            });
        }
        self.record("delete", &key);
        Ok(())
    }
}

/// [`RolloutTrigger`] that only records which workloads it was asked to restart.
#[derive(Default)]
pub struct RecordingRollout {
    restarts: Mutex<Vec<(String, String)>>,
    failing: Mutex<BTreeSet<String>>,
}

impl RecordingRollout {
    pub fn fail_on(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_owned());
    }

    /// Names of all attempted restarts, failed ones included.
    pub fn restarted(&self) -> Vec<String> {
        self.restarts
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.restarts
            .lock()
            .unwrap()
            .iter()
            .map(|(_, reason)| reason.clone())
            .collect()
    }
}

impl RolloutTrigger for RecordingRollout {
    async fn restart(
        &self,
        namespace: &str,
        target: &RolloutTarget,
        reason: &str,
    ) -> Result<(), rollout::Error> {
        self.restarts
            .lock()
            .unwrap()
            .push((target.name.clone(), reason.to_owned()));
        if self.failing.lock().unwrap().contains(&target.name) {
            return Err(rollout::Error::AnnotateWorkload {
                source: store::Error::Conflict {
                    kind: format!("{:?}", target.kind),
                    namespace: namespace.to_owned(),
                    name: target.name.clone(),
                },
                target: target.clone(),
            });
        }
        Ok(())
    }
}

/// Everything a reconcile step needs, backed by in-memory fakes.
pub struct Harness {
    pub argocd: ArgoCd,
    pub store: InMemoryStore,
    pub rollout: RecordingRollout,
    pub config: OperatorConfig,
}

impl Harness {
    pub fn new(argocd: ArgoCd) -> Self {
        Self {
            argocd,
            store: InMemoryStore::default(),
            rollout: RecordingRollout::default(),
            config: test_config(),
        }
    }

    pub fn ctx(&self) -> ReconcileContext<'_, InMemoryStore, RecordingRollout> {
        ReconcileContext {
            argocd: &self.argocd,
            namespace: NAMESPACE,
            store: &self.store,
            rollout: &self.rollout,
            config: &self.config,
        }
    }
}

pub fn test_config() -> OperatorConfig {
    OperatorConfig {
        password_hash_cost: TEST_HASH_COST,
        ..OperatorConfig::default()
    }
}

fn metadata(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_owned()),
        namespace: Some(NAMESPACE.to_owned()),
        ..ObjectMeta::default()
    }
}

pub fn argocd() -> ArgoCd {
    argocd_with_spec(ArgoCdSpec::default())
}

pub fn argocd_with_spec(spec: ArgoCdSpec) -> ArgoCd {
    ArgoCd {
        metadata: ObjectMeta {
            uid: Some("c27b3971-ea7f-4c3c-9b5c-1b4a0f7e0c11".to_owned()),
            ..metadata("example")
        },
        spec,
        status: None,
    }
}

pub fn opaque_secret(name: &str, data: &[(&str, &[u8])]) -> Secret {
    Secret {
        metadata: metadata(name),
        type_: Some("Opaque".to_owned()),
        data: Some(
            data.iter()
                .map(|(key, value)| (key.to_string(), ByteString(value.to_vec())))
                .collect(),
        ),
        ..Secret::default()
    }
}

pub fn tls_secret(name: &str, certificate: &[u8], private_key: &[u8]) -> Secret {
    Secret {
        type_: Some(SECRET_TYPE_TLS.to_owned()),
        ..opaque_secret(
            name,
            &[(TLS_CERT_KEY, certificate), (TLS_PRIVATE_KEY_KEY, private_key)],
        )
    }
}

pub fn deployment(name: &str) -> Deployment {
    Deployment {
        metadata: metadata(name),
        spec: Some(DeploymentSpec::default()),
        ..Deployment::default()
    }
}

pub fn stateful_set(name: &str) -> StatefulSet {
    StatefulSet {
        metadata: metadata(name),
        spec: Some(StatefulSetSpec::default()),
        ..StatefulSet::default()
    }
}

pub fn config_map(name: &str) -> ConfigMap {
    ConfigMap {
        metadata: metadata(name),
        ..ConfigMap::default()
    }
}
