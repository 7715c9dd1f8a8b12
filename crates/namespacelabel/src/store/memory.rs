//! In-process [`ObjectStore`] mirroring the API server semantics the
//! reconciler depends on: resource versions, version-checked updates and
//! finalizer-gated deletion.

use super::{ObjectKey, ObjectStore, Result, StoreError};
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug)]
struct State<K> {
    objects: BTreeMap<ObjectKey, K>,
    next_version: u64,
    failing_updates: usize,
    writes: usize,
}

/// Thread-safe in-memory store for one resource kind
#[derive(Debug)]
pub struct MemoryStore<K> {
    state: Mutex<State<K>>,
}

impl<K> Default for MemoryStore<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                next_version: 1,
                failing_updates: 0,
                writes: 0,
            }),
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

fn has_finalizers<K: Resource>(object: &K) -> bool {
    object
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|finalizers| !finalizers.is_empty())
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `update` fail with [`StoreError::Unavailable`]
    pub async fn fail_next_updates(&self, count: usize) {
        self.state.lock().await.failing_updates = count;
    }

    /// Number of successful `create` and `update` calls so far
    pub async fn write_count(&self) -> usize {
        self.state.lock().await.writes
    }

    /// Current stored copy, bypassing the trait
    pub async fn snapshot(&self, key: &ObjectKey) -> Option<K> {
        self.state.lock().await.objects.get(key).cloned()
    }
}

impl<K> State<K>
where
    K: Resource,
{
    fn stamp(&mut self, object: &mut K) {
        object.meta_mut().resource_version = Some(self.next_version.to_string());
        self.next_version += 1;
    }
}

#[async_trait]
impl<K> ObjectStore<K> for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>> {
        Ok(self.state.lock().await.objects.get(key).cloned())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let state = self.state.lock().await;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| namespace.is_none() || key.namespace.as_deref() == namespace)
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn create(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let mut state = self.state.lock().await;
        if state.objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { key });
        }

        let mut stored = object.clone();
        stored.meta_mut().creation_timestamp = Some(Time(chrono::Utc::now()));
        stored.meta_mut().deletion_timestamp = None;
        state.stamp(&mut stored);
        state.objects.insert(key, stored.clone());
        state.writes += 1;
        Ok(stored)
    }

    async fn update(&self, object: &K) -> Result<K> {
        let key = key_of(object)?;
        let mut state = self.state.lock().await;

        if state.failing_updates > 0 {
            state.failing_updates -= 1;
            return Err(StoreError::Unavailable(format!("injected failure updating {key}")));
        }

        let Some(current) = state.objects.get(&key) else {
            return Err(StoreError::NotFound { key });
        };

        let current_version = current.meta().resource_version.clone();
        let requested_version = &object.meta().resource_version;
        if requested_version.is_some() && *requested_version != current_version {
            return Err(StoreError::Conflict {
                message: format!(
                    "resource version {} is stale, current is {}",
                    object.meta().resource_version.as_deref().unwrap_or_default(),
                    current_version.as_deref().unwrap_or_default()
                ),
                key,
            });
        }

        let mut stored = object.clone();
        // deletion is only requested through delete()
        stored.meta_mut().deletion_timestamp = current.meta().deletion_timestamp.clone();
        state.stamp(&mut stored);
        state.writes += 1;

        if stored.meta().deletion_timestamp.is_some() && !has_finalizers(&stored) {
            debug!(%key, "Last finalizer released, removing object");
            state.objects.remove(&key);
        } else {
            state.objects.insert(key, stored.clone());
        }
        Ok(stored)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<()> {
        let mut state = self.state.lock().await;
        let Some(current) = state.objects.get(key) else {
            return Err(StoreError::NotFound { key: key.clone() });
        };

        if !has_finalizers(current) {
            state.objects.remove(key);
            return Ok(());
        }

        if current.meta().deletion_timestamp.is_none() {
            let mut terminating = current.clone();
            terminating.meta_mut().deletion_timestamp = Some(Time(chrono::Utc::now()));
            state.stamp(&mut terminating);
            state.objects.insert(key.clone(), terminating);
        }
        Ok(())
    }
}
