//! Object storage seam.
//!
//! The reconciler talks to the orchestration API only through
//! [`ObjectStore`]. [`KubeStore`] is the production implementation on top of
//! `kube::Api`; tests supply an in-memory store.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::controller::error::{Error, Result};

/// Field manager name for every write the operator makes
pub const FIELD_MANAGER: &str = "pg-companion-operator";

/// Namespaced object kinds the store can hold.
pub trait StoredObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Serialize
    + DeserializeOwned
    + Debug
    + Send
    + Sync
    + 'static
{
}

impl<K> StoredObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Read and write access to namespaced objects.
///
/// Implementations must report a missing object as `Ok(None)` from `get`,
/// a create collision as [`Error::AlreadyExists`], a stale replace as
/// [`Error::Conflict`] and throttling or unavailability as
/// [`Error::Transient`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>>;

    async fn create<K: StoredObject>(&self, namespace: &str, object: &K) -> Result<K>;

    /// Replace an object. The object's `resourceVersion` guards against lost updates.
    async fn replace<K: StoredObject>(&self, namespace: &str, name: &str, object: &K) -> Result<K>;

    /// Merge-patch the status subresource.
    async fn patch_status<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()>;
}

/// [`ObjectStore`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn api<K: StoredObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[derive(Clone, Copy)]
enum WriteKind {
    Create,
    Replace,
    Other,
}

/// Map API status codes onto the store error contract.
fn classify<K: StoredObject>(err: kube::Error, name: &str, write: WriteKind) -> Error {
    let kind = K::kind(&()).to_string();
    match err {
        kube::Error::Api(ref response) if response.code == 409 => match write {
            WriteKind::Create => Error::AlreadyExists {
                kind,
                name: name.to_string(),
            },
            WriteKind::Replace | WriteKind::Other => Error::Conflict {
                kind,
                name: name.to_string(),
            },
        },
        kube::Error::Api(ref response) if response.code == 429 || response.code >= 500 => {
            Error::Transient(format!("{kind} {name}: {}", response.message))
        }
        other => Error::Kube(other),
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get<K: StoredObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        self.api::<K>(namespace)
            .get_opt(name)
            .await
            .map_err(|e| classify::<K>(e, name, WriteKind::Other))
    }

    async fn create<K: StoredObject>(&self, namespace: &str, object: &K) -> Result<K> {
        let name = object.meta().name.clone().unwrap_or_default();
        self.api::<K>(namespace)
            .create(&post_params(), object)
            .await
            .map_err(|e| classify::<K>(e, &name, WriteKind::Create))
    }

    async fn replace<K: StoredObject>(&self, namespace: &str, name: &str, object: &K) -> Result<K> {
        self.api::<K>(namespace)
            .replace(name, &post_params(), object)
            .await
            .map_err(|e| classify::<K>(e, name, WriteKind::Replace))
    }

    async fn patch_status<K: StoredObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<()> {
        let patch = serde_json::json!({ "status": status });
        self.api::<K>(namespace)
            .patch_status(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify::<K>(e, name, WriteKind::Other))?;
        Ok(())
    }
}
