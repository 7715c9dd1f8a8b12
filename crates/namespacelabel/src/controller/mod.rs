//! # NamespaceLabel controller
//!
//! [`Reconciler`] holds the reconciliation logic against abstract stores.
//! [`run_controller`] wires it to the kube-rs controller runtime.

use crate::config::OperatorConfig;
use crate::crds::NamespaceLabel;
use crate::store::{KubeStore, StoreScope};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Namespace;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::runtime::watcher::Config;
use kube::{Api, Client, ResourceExt};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Dispatch, Instrument};

pub mod finalizer;
pub mod reconcile;
pub mod types;

pub use reconcile::{ReconcileOutcome, Reconciler};
pub use types::{Context, Error, Result};

/// Main entry point: watch `NamespaceLabel` objects (and optionally Namespaces)
/// until the watch streams end.
#[instrument(skip(client, config), fields(watch_namespace = ?config.watch_namespace))]
pub async fn run_controller(client: Client, config: Arc<OperatorConfig>) -> Result<()> {
    config
        .validate()
        .map_err(|e| Error::ConfigError(e.to_string()))?;

    info!(finalizer = %config.finalizer, "Starting NamespaceLabel controller");

    let reconciler = Reconciler::from_config(
        Arc::new(KubeStore::<NamespaceLabel>::new(client.clone())),
        Arc::new(KubeStore::<Namespace>::new(client.clone())),
        &config,
        tracing::dispatcher::get_default(Dispatch::clone),
    );
    let context = Arc::new(Context {
        reconciler,
        config: config.clone(),
    });

    let intents_api: Api<NamespaceLabel> =
        NamespaceLabel::api(client.clone(), config.watch_namespace.as_deref());
    let watcher_config = Config::default().any_semantic();

    let mut controller = Controller::new(intents_api, watcher_config.clone());
    if config.watch_namespace_changes {
        let cache = controller.store();
        let namespaces: Api<Namespace> = Api::all(client);
        controller = controller.watches(namespaces, watcher_config, move |namespace| {
            intents_in_namespace(&cache, &namespace.name_any())
        });
    }

    controller
        .run(reconcile_namespace_label, error_policy, context)
        .for_each(|reconciliation_result| {
            let span = tracing::info_span!("namespacelabel_reconciliation_result");
            async move {
                match reconciliation_result {
                    Ok((object_ref, _action)) => {
                        debug!(resource = %object_ref, "NamespaceLabel reconciliation successful");
                    }
                    Err(reconciliation_err) => {
                        error!(
                            error = ?reconciliation_err,
                            "NamespaceLabel reconciliation error"
                        );
                    }
                }
            }
            .instrument(span)
        })
        .await;

    info!("NamespaceLabel controller shutting down");
    Ok(())
}

/// Every cached `NamespaceLabel` living in `namespace`
fn intents_in_namespace(
    cache: &Store<NamespaceLabel>,
    namespace: &str,
) -> Vec<ObjectRef<NamespaceLabel>> {
    cache
        .state()
        .iter()
        .filter(|intent| intent.namespace().as_deref() == Some(namespace))
        .map(|intent| ObjectRef::from_obj(&**intent))
        .collect()
}

#[instrument(
    skip(intent, ctx),
    fields(intent = %intent.name_any(), namespace = ?intent.namespace())
)]
async fn reconcile_namespace_label(
    intent: Arc<NamespaceLabel>,
    ctx: Arc<Context>,
) -> Result<Action> {
    let key = intent.object_key().ok_or(Error::MissingObjectKey)?;
    let outcome = ctx.reconciler.reconcile(&key).await?;
    debug!(?outcome, "Reconcile completed");
    Ok(Action::await_change())
}

/// Conflicts retry quickly from a fresh read; other failures back off longer
fn error_policy(intent: Arc<NamespaceLabel>, err: &Error, ctx: Arc<Context>) -> Action {
    let delay = if err.is_conflict() {
        ctx.config.requeue.conflict_delay()
    } else {
        ctx.config.requeue.error_delay()
    };
    warn!(
        error = %err,
        intent = %intent.name_any(),
        namespace = ?intent.namespace(),
        retry_in = ?delay,
        "NamespaceLabel reconciliation failed, requeueing"
    );
    Action::requeue(delay)
}
