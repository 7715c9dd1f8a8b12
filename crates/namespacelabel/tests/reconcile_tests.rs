//! Reconciler scenarios against in-memory stores
//!
//! Each test builds a small "cluster" of `MemoryStore`s, drives the
//! `Reconciler` the way the controller runtime would, and checks the labels
//! left on the namespace.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::ObjectMeta;
use namespacelabel::config::DEFAULT_FINALIZER;
use namespacelabel::store::{MemoryStore, ObjectKey, ObjectStore, StoreError};
use namespacelabel::{NamespaceLabel, ReconcileOutcome, Reconciler};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{Dispatch, Level};

type Labels = BTreeMap<String, String>;

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

fn test_dispatch() -> Dispatch {
    Dispatch::new(
        tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(Level::DEBUG)
            .finish(),
    )
}

struct Cluster {
    intents: Arc<MemoryStore<NamespaceLabel>>,
    namespaces: Arc<MemoryStore<Namespace>>,
    reconciler: Reconciler,
}

impl Cluster {
    fn new() -> Self {
        let intents: Arc<MemoryStore<NamespaceLabel>> = Arc::new(MemoryStore::new());
        let namespaces: Arc<MemoryStore<Namespace>> = Arc::new(MemoryStore::new());
        let reconciler = Reconciler::new(
            intents.clone(),
            namespaces.clone(),
            DEFAULT_FINALIZER,
            test_dispatch(),
        );
        Self {
            intents,
            namespaces,
            reconciler,
        }
    }

    fn with_reconciler(mut self, build: impl FnOnce(Reconciler) -> Reconciler) -> Self {
        let placeholder = Reconciler::new(
            self.intents.clone(),
            self.namespaces.clone(),
            DEFAULT_FINALIZER,
            Dispatch::none(),
        );
        self.reconciler = build(std::mem::replace(&mut self.reconciler, placeholder));
        self
    }

    async fn create_namespace(&self, name: &str, pairs: &[(&str, &str)]) {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(labels(pairs)),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        };
        self.namespaces.create(&namespace).await.unwrap();
    }

    async fn create_intent(&self, namespace: &str, name: &str, pairs: &[(&str, &str)]) {
        let intent = NamespaceLabel::declaring(namespace, name, labels(pairs));
        self.intents.create(&intent).await.unwrap();
    }

    async fn update_intent(&self, namespace: &str, name: &str, pairs: &[(&str, &str)]) {
        let mut intent = self.intent(namespace, name).await.unwrap();
        intent.spec.labels = labels(pairs);
        self.intents.update(&intent).await.unwrap();
    }

    async fn delete_intent(&self, namespace: &str, name: &str) {
        self.intents
            .delete(&ObjectKey::namespaced(namespace, name))
            .await
            .unwrap();
    }

    async fn intent(&self, namespace: &str, name: &str) -> Option<NamespaceLabel> {
        self.intents
            .get(&ObjectKey::namespaced(namespace, name))
            .await
            .unwrap()
    }

    async fn set_namespace_label(&self, namespace: &str, key: &str, value: &str) {
        let mut ns = self
            .namespaces
            .get(&ObjectKey::cluster(namespace))
            .await
            .unwrap()
            .unwrap();
        ns.metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self.namespaces.update(&ns).await.unwrap();
    }

    async fn namespace_labels(&self, namespace: &str) -> Labels {
        self.namespaces
            .get(&ObjectKey::cluster(namespace))
            .await
            .unwrap()
            .unwrap()
            .metadata
            .labels
            .unwrap_or_default()
    }

    async fn reconcile(&self, namespace: &str, name: &str) -> ReconcileOutcome {
        self.reconciler
            .reconcile(&ObjectKey::namespaced(namespace, name))
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn create_then_delete_round_trip() {
    let cluster = Cluster::new();
    cluster
        .create_namespace("ns", &[("app.kubernetes.io/name", "ns")])
        .await;
    cluster.create_intent("ns", "a", &[("key_1", "value_1")]).await;

    cluster.reconcile("ns", "a").await;
    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[("app.kubernetes.io/name", "ns"), ("key_1", "value_1")])
    );

    cluster.delete_intent("ns", "a").await;
    let outcome = cluster.reconcile("ns", "a").await;

    assert_eq!(
        outcome,
        ReconcileOutcome::Retracted {
            removed: vec!["key_1".to_string()]
        }
    );
    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[("app.kubernetes.io/name", "ns")])
    );
    assert!(cluster.intent("ns", "a").await.is_none());
}

#[tokio::test]
async fn first_reconcile_attaches_finalizer() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[]).await;
    cluster.create_intent("ns", "a", &[("team", "payments")]).await;

    cluster.reconcile("ns", "a").await;

    let intent = cluster.intent("ns", "a").await.unwrap();
    assert!(intent.has_finalizer(DEFAULT_FINALIZER));
}

#[tokio::test]
async fn second_reconcile_writes_nothing() {
    let cluster = Cluster::new();
    cluster
        .create_namespace("ns", &[("kubernetes.io/metadata.name", "ns")])
        .await;
    cluster.create_intent("ns", "a", &[("team", "payments")]).await;

    assert_eq!(
        cluster.reconcile("ns", "a").await,
        ReconcileOutcome::Synced { changed: true }
    );
    let intent_writes = cluster.intents.write_count().await;
    let namespace_writes = cluster.namespaces.write_count().await;

    assert_eq!(
        cluster.reconcile("ns", "a").await,
        ReconcileOutcome::Synced { changed: false }
    );
    assert_eq!(cluster.intents.write_count().await, intent_writes);
    assert_eq!(cluster.namespaces.write_count().await, namespace_writes);
}

#[tokio::test]
async fn sync_derives_labels_from_all_live_intents() {
    let cluster = Cluster::new();
    cluster
        .create_namespace("ns", &[("kubernetes.io/x", "y"), ("c", "3")])
        .await;
    cluster.create_intent("ns", "i1", &[("a", "1")]).await;
    cluster.create_intent("ns", "i2", &[("b", "2")]).await;

    cluster.reconcile("ns", "i1").await;

    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[("kubernetes.io/x", "y"), ("a", "1"), ("b", "2")])
    );
}

#[tokio::test]
async fn updated_intent_replaces_its_old_labels() {
    let cluster = Cluster::new();
    cluster
        .create_namespace("ns", &[("app.kubernetes.io/name", "ns")])
        .await;
    cluster.create_intent("ns", "a", &[("key_1", "value_1")]).await;
    cluster.reconcile("ns", "a").await;

    cluster
        .update_intent("ns", "a", &[("NewOne", "NewOne"), ("AnotherOne", "AnotherOne")])
        .await;
    cluster.reconcile("ns", "a").await;

    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[
            ("app.kubernetes.io/name", "ns"),
            ("NewOne", "NewOne"),
            ("AnotherOne", "AnotherOne"),
        ])
    );
}

#[tokio::test]
async fn protected_labels_added_later_survive_sync() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[]).await;
    cluster.create_intent("ns", "a", &[("a", "1")]).await;
    cluster.reconcile("ns", "a").await;

    cluster
        .set_namespace_label("ns", "kubernetes.io/metadata.name", "ns")
        .await;
    cluster.set_namespace_label("ns", "stray", "x").await;
    cluster.reconcile("ns", "a").await;

    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[("kubernetes.io/metadata.name", "ns"), ("a", "1")])
    );
}

#[tokio::test]
async fn intent_can_override_a_protected_label() {
    let cluster = Cluster::new();
    cluster
        .create_namespace("ns", &[("app.kubernetes.io/name", "ns")])
        .await;
    cluster
        .create_intent("ns", "a", &[("app.kubernetes.io/name", "custom")])
        .await;

    cluster.reconcile("ns", "a").await;

    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[("app.kubernetes.io/name", "custom")])
    );
}

#[tokio::test]
async fn conflicting_intents_resolve_the_same_way_from_either_side() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[]).await;
    cluster.create_intent("ns", "beta", &[("tier", "silver")]).await;
    cluster.create_intent("ns", "alpha", &[("tier", "gold")]).await;

    cluster.reconcile("ns", "beta").await;
    let from_beta = cluster.namespace_labels("ns").await;
    cluster.reconcile("ns", "alpha").await;
    let from_alpha = cluster.namespace_labels("ns").await;

    assert_eq!(from_beta, from_alpha);
    assert_eq!(from_alpha.get("tier").map(String::as_str), Some("gold"));
}

#[tokio::test]
async fn retraction_keeps_labels_claimed_by_other_intents() {
    let cluster = Cluster::new();
    cluster
        .create_namespace("ns", &[("app.kubernetes.io/name", "ns")])
        .await;
    cluster
        .create_intent("ns", "one", &[("shared", "v"), ("Delete", "Delete")])
        .await;
    cluster
        .create_intent("ns", "two", &[("shared", "v"), ("Keep", "Keep")])
        .await;
    cluster.reconcile("ns", "one").await;
    cluster.reconcile("ns", "two").await;

    cluster.delete_intent("ns", "one").await;
    cluster.reconcile("ns", "one").await;

    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[
            ("app.kubernetes.io/name", "ns"),
            ("shared", "v"),
            ("Keep", "Keep"),
        ])
    );

    cluster.delete_intent("ns", "two").await;
    cluster.reconcile("ns", "two").await;

    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[("app.kubernetes.io/name", "ns")])
    );
}

#[tokio::test]
async fn deleting_both_owners_together_removes_shared_label() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[]).await;
    cluster.create_intent("ns", "one", &[("shared", "v")]).await;
    cluster.create_intent("ns", "two", &[("shared", "v")]).await;
    cluster.reconcile("ns", "one").await;
    cluster.reconcile("ns", "two").await;

    cluster.delete_intent("ns", "one").await;
    cluster.delete_intent("ns", "two").await;
    cluster.reconcile("ns", "one").await;
    cluster.reconcile("ns", "two").await;

    assert!(cluster.namespace_labels("ns").await.is_empty());
    assert!(cluster.intent("ns", "one").await.is_none());
    assert!(cluster.intent("ns", "two").await.is_none());
}

#[tokio::test]
async fn retraction_requires_exact_value_match() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[]).await;
    cluster.create_intent("ns", "a", &[("k", "v1")]).await;
    cluster.reconcile("ns", "a").await;

    cluster.set_namespace_label("ns", "k", "v2").await;
    cluster.delete_intent("ns", "a").await;
    let outcome = cluster.reconcile("ns", "a").await;

    assert_eq!(outcome, ReconcileOutcome::Retracted { removed: vec![] });
    assert_eq!(cluster.namespace_labels("ns").await, labels(&[("k", "v2")]));
    assert!(cluster.intent("ns", "a").await.is_none());
}

#[tokio::test]
async fn failed_retraction_keeps_the_finalizer() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[]).await;
    cluster.create_intent("ns", "a", &[("team", "payments")]).await;
    cluster.reconcile("ns", "a").await;
    cluster.delete_intent("ns", "a").await;

    cluster.namespaces.fail_next_updates(1).await;
    let err = cluster
        .reconciler
        .reconcile(&ObjectKey::namespaced("ns", "a"))
        .await
        .unwrap_err();
    assert!(!err.is_conflict());

    let intent = cluster.intent("ns", "a").await.unwrap();
    assert!(intent.is_terminating());
    assert!(intent.has_finalizer(DEFAULT_FINALIZER));
    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[("team", "payments")])
    );

    cluster.reconcile("ns", "a").await;
    assert!(cluster.namespace_labels("ns").await.is_empty());
    assert!(cluster.intent("ns", "a").await.is_none());
}

#[tokio::test]
async fn failed_finalizer_release_is_resumable() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[]).await;
    cluster.create_intent("ns", "a", &[("team", "payments")]).await;
    cluster.reconcile("ns", "a").await;
    cluster.delete_intent("ns", "a").await;

    cluster.intents.fail_next_updates(1).await;
    assert!(cluster
        .reconciler
        .reconcile(&ObjectKey::namespaced("ns", "a"))
        .await
        .is_err());
    assert!(cluster.namespace_labels("ns").await.is_empty());
    assert!(cluster.intent("ns", "a").await.is_some());

    let outcome = cluster.reconcile("ns", "a").await;
    assert_eq!(outcome, ReconcileOutcome::Retracted { removed: vec![] });
    assert!(cluster.intent("ns", "a").await.is_none());
}

#[tokio::test]
async fn missing_intent_is_a_no_op() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[("a", "1")]).await;

    assert_eq!(cluster.reconcile("ns", "ghost").await, ReconcileOutcome::Gone);
    assert_eq!(cluster.namespaces.write_count().await, 1);
}

#[tokio::test]
async fn terminating_intent_without_our_finalizer_is_ignored() {
    let cluster = Cluster::new();
    cluster.create_namespace("ns", &[("team", "payments")]).await;
    let mut intent = NamespaceLabel::declaring("ns", "a", labels(&[("team", "payments")]));
    intent.metadata.finalizers = Some(vec!["other.example.io/hold".to_string()]);
    cluster.intents.create(&intent).await.unwrap();
    cluster.delete_intent("ns", "a").await;

    assert_eq!(cluster.reconcile("ns", "a").await, ReconcileOutcome::Ignored);
    assert_eq!(
        cluster.namespace_labels("ns").await,
        labels(&[("team", "payments")])
    );
}

#[tokio::test]
async fn intent_in_missing_namespace_is_deleted_and_released() {
    let cluster = Cluster::new();
    cluster.create_intent("gone", "a", &[("team", "payments")]).await;

    assert_eq!(
        cluster.reconcile("gone", "a").await,
        ReconcileOutcome::NamespaceMissing
    );
    assert!(cluster.intent("gone", "a").await.unwrap().is_terminating());

    assert_eq!(
        cluster.reconcile("gone", "a").await,
        ReconcileOutcome::Retracted { removed: vec![] }
    );
    assert!(cluster.intent("gone", "a").await.is_none());
}

#[tokio::test]
async fn orphan_deletion_can_be_disabled() {
    let cluster = Cluster::new().with_reconciler(|r| r.with_orphan_deletion(false));
    cluster.create_intent("gone", "a", &[("team", "payments")]).await;

    assert_eq!(
        cluster.reconcile("gone", "a").await,
        ReconcileOutcome::NamespaceMissing
    );
    let intent = cluster.intent("gone", "a").await.unwrap();
    assert!(!intent.is_terminating());
    assert!(intent.has_finalizer(DEFAULT_FINALIZER));
}

/// Namespace store where another writer updates the namespace between our read
/// and our first write.
struct RacingNamespaces {
    inner: Arc<MemoryStore<Namespace>>,
    raced: AtomicBool,
}

#[async_trait]
impl ObjectStore<Namespace> for RacingNamespaces {
    async fn get(&self, key: &ObjectKey) -> Result<Option<Namespace>, StoreError> {
        self.inner.get(key).await
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<Namespace>, StoreError> {
        self.inner.list(namespace).await
    }

    async fn create(&self, object: &Namespace) -> Result<Namespace, StoreError> {
        self.inner.create(object).await
    }

    async fn update(&self, object: &Namespace) -> Result<Namespace, StoreError> {
        if !self.raced.swap(true, Ordering::SeqCst) {
            let key = ObjectKey::cluster(object.metadata.name.as_deref().unwrap_or_default());
            let mut theirs = self.inner.get(&key).await?.unwrap_or_default();
            theirs
                .metadata
                .labels
                .get_or_insert_with(BTreeMap::new)
                .insert("kubernetes.io/metadata.name".to_string(), key.name.clone());
            self.inner.update(&theirs).await?;
        }
        self.inner.update(object).await
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn concurrent_namespace_write_is_a_retryable_conflict() {
    let intents: Arc<MemoryStore<NamespaceLabel>> = Arc::new(MemoryStore::new());
    let backing: Arc<MemoryStore<Namespace>> = Arc::new(MemoryStore::new());
    let racing = Arc::new(RacingNamespaces {
        inner: backing.clone(),
        raced: AtomicBool::new(false),
    });
    let reconciler = Reconciler::new(intents.clone(), racing, DEFAULT_FINALIZER, test_dispatch());

    backing
        .create(&Namespace {
            metadata: ObjectMeta {
                name: Some("ns".to_string()),
                ..ObjectMeta::default()
            },
            ..Namespace::default()
        })
        .await
        .unwrap();
    intents
        .create(&NamespaceLabel::declaring("ns", "a", labels(&[("a", "1")])))
        .await
        .unwrap();
    let key = ObjectKey::namespaced("ns", "a");

    let err = reconciler.reconcile(&key).await.unwrap_err();
    assert!(err.is_conflict());

    assert_eq!(
        reconciler.reconcile(&key).await.unwrap(),
        ReconcileOutcome::Synced { changed: true }
    );
    let stored = backing.snapshot(&ObjectKey::cluster("ns")).await.unwrap();
    assert_eq!(
        stored.metadata.labels,
        Some(labels(&[("kubernetes.io/metadata.name", "ns"), ("a", "1")]))
    );
}
