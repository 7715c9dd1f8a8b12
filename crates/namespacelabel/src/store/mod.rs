//! # Object Store
//!
//! The reconciler never talks to the API server directly. It reads and writes
//! `NamespaceLabel` and `Namespace` objects through [`ObjectStore`], which
//! [`KubeStore`] implements over `kube::Api` and [`MemoryStore`] implements
//! in-process for tests.

pub mod kube_api;
pub mod memory;

pub use kube_api::{KubeStore, StoreScope};
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Identity of a stored object. Cluster-scoped objects have no namespace.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    #[must_use]
    pub fn namespaced(namespace: &str, name: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn cluster(name: &str) -> Self {
        Self {
            namespace: None,
            name: name.to_string(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{namespace}/{}", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Errors surfaced by store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{key} not found")]
    NotFound { key: ObjectKey },

    #[error("conflict writing {key}: {message}")]
    Conflict { key: ObjectKey, message: String },

    #[error("{key} already exists")]
    AlreadyExists { key: ObjectKey },

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("object is missing a name")]
    MissingName,

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Optimistic-concurrency failure; the caller should re-read and recompute
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Key-value access to one resource kind.
///
/// `update` is optimistic: the object carries the resource version it was read
/// at, and a stale version fails with [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Fetch one object. A missing object is `Ok(None)`.
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>>;

    /// List objects, restricted to `namespace` when given
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>>;

    async fn create(&self, object: &K) -> Result<K>;

    /// Replace an object, conditioned on its resource version
    async fn update(&self, object: &K) -> Result<K>;

    /// Request deletion. Objects holding finalizers stay until they are released.
    async fn delete(&self, key: &ObjectKey) -> Result<()>;
}
