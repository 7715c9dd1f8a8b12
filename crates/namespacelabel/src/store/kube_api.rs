//! [`ObjectStore`] backed by the Kubernetes API server

use super::{ObjectKey, ObjectStore, Result, StoreError};
use crate::crds::NamespaceLabel;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, Error as KubeError, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;
use tracing::debug;

/// How to build an `Api` for a resource kind, given an optional namespace.
pub trait StoreScope: Resource<DynamicType = ()> + Sized {
    fn api(client: Client, namespace: Option<&str>) -> Api<Self>;
}

impl StoreScope for NamespaceLabel {
    fn api(client: Client, namespace: Option<&str>) -> Api<Self> {
        match namespace {
            Some(namespace) => Api::namespaced(client, namespace),
            None => Api::all(client),
        }
    }
}

impl StoreScope for Namespace {
    fn api(client: Client, _namespace: Option<&str>) -> Api<Self> {
        Api::all(client)
    }
}

/// Store that reads and writes through a `kube::Client`
#[derive(Clone)]
pub struct KubeStore<K> {
    client: Client,
    _kind: PhantomData<fn() -> K>,
}

impl<K> KubeStore<K> {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _kind: PhantomData,
        }
    }
}

fn key_of<K: Resource>(object: &K) -> Result<ObjectKey> {
    let name = object.meta().name.clone().ok_or(StoreError::MissingName)?;
    Ok(ObjectKey {
        namespace: object.meta().namespace.clone(),
        name,
    })
}

fn map_error(key: &ObjectKey, err: KubeError) -> StoreError {
    match err {
        KubeError::Api(response) if response.code == 404 => {
            StoreError::NotFound { key: key.clone() }
        }
        KubeError::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists { key: key.clone() }
        }
        KubeError::Api(response) if response.code == 409 => StoreError::Conflict {
            key: key.clone(),
            message: response.message,
        },
        other => StoreError::Kube(other),
    }
}

#[async_trait]
impl<K> ObjectStore<K> for KubeStore<K>
where
    K: StoreScope + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        api.get_opt(&key.name).await.map_err(|e| map_error(key, e))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let api = K::api(self.client.clone(), namespace);
        let list = api.list(&ListParams::default()).await?;
        debug!(
            namespace = namespace.unwrap_or("*"),
            count = list.items.len(),
            "Listed objects"
        );
        Ok(list.items)
    }

    async fn create(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        api.create(&PostParams::default(), object)
            .await
            .map_err(|e| map_error(&key, e))
    }

    async fn update(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        // replace sends metadata.resourceVersion, so a stale read fails with 409
        api.replace(&object.name_any(), &PostParams::default(), object)
            .await
            .map_err(|e| map_error(&key, e))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let api = K::api(self.client.clone(), key.namespace.as_deref());
        api.delete(&key.name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| map_error(key, e))
    }
}
