use super::finalizer::{self, FinalizerOp, FinalizerState, FinalizerStep};
use super::types::{Error, Result};
use crate::config::OperatorConfig;
use crate::crds::NamespaceLabel;
use crate::labels::{desired_labels, labels_still_claimed, retract_labels};
use crate::store::{ObjectKey, ObjectStore};
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use std::sync::Arc;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, instrument, warn, Dispatch};

/// Result of one reconcile invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The `NamespaceLabel` no longer exists
    Gone,
    /// Full sync ran; `changed` is false when the namespace already matched
    Synced { changed: bool },
    /// Labels retracted (keys listed) and the finalizer released
    Retracted { removed: Vec<String> },
    /// The target namespace does not exist
    NamespaceMissing,
    /// Terminating without our finalizer; nothing to do
    Ignored,
}

/// Drives `NamespaceLabel` objects and their namespace towards the declared state.
///
/// Every mutation is a single version-checked store write, so an interrupted
/// reconcile leaves consistent objects behind and the next attempt starts over
/// from fresh reads.
pub struct Reconciler {
    intents: Arc<dyn ObjectStore<NamespaceLabel>>,
    namespaces: Arc<dyn ObjectStore<Namespace>>,
    finalizer: String,
    delete_orphaned_intents: bool,
    dispatch: Dispatch,
}

impl Reconciler {
    /// `dispatch` receives every log event and span emitted while reconciling.
    pub fn new(
        intents: Arc<dyn ObjectStore<NamespaceLabel>>,
        namespaces: Arc<dyn ObjectStore<Namespace>>,
        finalizer: impl Into<String>,
        dispatch: Dispatch,
    ) -> Self {
        Self {
            intents,
            namespaces,
            finalizer: finalizer.into(),
            delete_orphaned_intents: true,
            dispatch,
        }
    }

    pub fn from_config(
        intents: Arc<dyn ObjectStore<NamespaceLabel>>,
        namespaces: Arc<dyn ObjectStore<Namespace>>,
        config: &OperatorConfig,
        dispatch: Dispatch,
    ) -> Self {
        Self::new(intents, namespaces, config.finalizer.clone(), dispatch)
            .with_orphan_deletion(config.delete_orphaned_intents)
    }

    #[must_use]
    pub fn with_orphan_deletion(mut self, enabled: bool) -> Self {
        self.delete_orphaned_intents = enabled;
        self
    }

    #[must_use]
    pub fn finalizer(&self) -> &str {
        &self.finalizer
    }

    /// Reconcile the `NamespaceLabel` identified by `key`.
    ///
    /// Store errors abort the attempt and are returned for the caller to retry;
    /// `NotFound` on the object itself is a successful no-op.
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        async { self.reconcile_key(key).await }
            .with_subscriber(self.dispatch.clone())
            .await
    }

    #[instrument(skip(self, key), fields(intent = %key))]
    async fn reconcile_key(&self, key: &ObjectKey) -> Result<ReconcileOutcome> {
        let Some(intent) = self.intents.get(key).await? else {
            debug!("NamespaceLabel no longer exists, nothing to clean up");
            return Ok(ReconcileOutcome::Gone);
        };

        let step = FinalizerStep::for_intent(&intent, &self.finalizer);
        debug!(
            state = ?FinalizerState::of(Some(&intent), &self.finalizer),
            ?step,
            labels = intent.declared_labels().len(),
            "Reconciling NamespaceLabel"
        );

        match step {
            FinalizerStep::Attach => {
                let Some(intent) = self.update_finalizer(intent, FinalizerOp::Attach).await? else {
                    return Ok(ReconcileOutcome::Gone);
                };
                self.sync_namespace(&intent).await
            }
            FinalizerStep::Sync => self.sync_namespace(&intent).await,
            FinalizerStep::Retract => self.retract(intent).await,
            FinalizerStep::Ignore => {
                debug!(
                    finalizer = %self.finalizer,
                    "NamespaceLabel is terminating without our finalizer, skipping"
                );
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    /// Recompute the namespace's labels from every intent in it and write them
    /// back when they differ.
    async fn sync_namespace(&self, intent: &NamespaceLabel) -> Result<ReconcileOutcome> {
        let namespace_name = intent.namespace().ok_or(Error::MissingObjectKey)?;

        let intents = self.intents.list(Some(namespace_name.as_str())).await?;
        let Some(mut namespace) = self
            .namespaces
            .get(&ObjectKey::cluster(&namespace_name))
            .await?
        else {
            return self.handle_missing_namespace(intent, &namespace_name).await;
        };

        let desired = desired_labels(&namespace, &intents);
        if namespace.labels() == &desired {
            debug!(namespace = %namespace_name, "Namespace labels already in sync");
            return Ok(ReconcileOutcome::Synced { changed: false });
        }

        let label_count = desired.len();
        namespace.metadata.labels = Some(desired);
        self.namespaces.update(&namespace).await?;

        info!(
            namespace = %namespace_name,
            intents = intents.len(),
            labels = label_count,
            "Synced namespace labels"
        );
        Ok(ReconcileOutcome::Synced { changed: true })
    }

    async fn handle_missing_namespace(
        &self,
        intent: &NamespaceLabel,
        namespace_name: &str,
    ) -> Result<ReconcileOutcome> {
        if !self.delete_orphaned_intents {
            warn!(
                namespace = %namespace_name,
                "Namespace not found, leaving NamespaceLabel in place"
            );
            return Ok(ReconcileOutcome::NamespaceMissing);
        }

        let key = intent.object_key().ok_or(Error::MissingObjectKey)?;
        match self.intents.delete(&key).await {
            Ok(()) => info!(
                namespace = %namespace_name,
                "Namespace not found, deleted orphaned NamespaceLabel"
            ),
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err.into()),
        }
        Ok(ReconcileOutcome::NamespaceMissing)
    }

    /// Remove this intent's labels net of other owners' claims, then release
    /// the finalizer. The namespace write must succeed before the token goes.
    async fn retract(&self, intent: NamespaceLabel) -> Result<ReconcileOutcome> {
        let namespace_name = intent.namespace().ok_or(Error::MissingObjectKey)?;
        let name = intent.name_any();

        let removed = match self
            .namespaces
            .get(&ObjectKey::cluster(&namespace_name))
            .await?
        {
            None => {
                info!(namespace = %namespace_name, "Namespace is gone, skipping label retraction");
                Vec::new()
            }
            Some(mut namespace) => {
                let siblings = self.intents.list(Some(namespace_name.as_str())).await?;
                let claimed = labels_still_claimed(&siblings, &name);
                let current = namespace.labels().clone();
                let remaining = retract_labels(&current, intent.declared_labels(), &claimed);

                let removed: Vec<String> = current
                    .keys()
                    .filter(|key| !remaining.contains_key(*key))
                    .cloned()
                    .collect();

                if removed.is_empty() {
                    debug!(namespace = %namespace_name, "No labels left to retract");
                } else {
                    namespace.metadata.labels = Some(remaining);
                    self.namespaces.update(&namespace).await?;
                    info!(
                        namespace = %namespace_name,
                        removed = ?removed,
                        "Retracted NamespaceLabel labels"
                    );
                }
                removed
            }
        };

        self.update_finalizer(intent, FinalizerOp::Detach).await?;
        Ok(ReconcileOutcome::Retracted { removed })
    }

    /// Write a finalizer change. `None` means the object vanished meanwhile.
    async fn update_finalizer(
        &self,
        mut intent: NamespaceLabel,
        op: FinalizerOp,
    ) -> Result<Option<NamespaceLabel>> {
        if !finalizer::apply(op, &mut intent, &self.finalizer) {
            return Ok(Some(intent));
        }

        match self.intents.update(&intent).await {
            Ok(updated) => {
                info!(finalizer = %self.finalizer, ?op, "Updated NamespaceLabel finalizers");
                Ok(Some(updated))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}
