//! Desired label set for a namespace

use super::{extract_protected, Labels};
use crate::crds::NamespaceLabel;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;

/// Overlay `intent_labels` on top of `protected`.
///
/// Intent labels win on key collisions, so an intent may override a protected
/// label by declaring the same key.
#[must_use]
pub fn merge_labels(protected: &Labels, intent_labels: &Labels) -> Labels {
    let mut merged = protected.clone();
    merged.extend(
        intent_labels
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );
    merged
}

/// Union of the labels declared by every live (non-terminating) intent.
///
/// Intents are ordered by name and the first to declare a key owns it, so the
/// result does not depend on the order the store listed them in.
#[must_use]
pub fn intent_union<'a, I>(intents: I) -> Labels
where
    I: IntoIterator<Item = &'a NamespaceLabel>,
{
    let mut live: Vec<&NamespaceLabel> = intents
        .into_iter()
        .filter(|intent| !intent.is_terminating())
        .collect();
    live.sort_by_key(|intent| intent.name_any());

    let mut union = Labels::new();
    for intent in live {
        for (key, value) in intent.declared_labels() {
            union.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    union
}

/// Full label set `namespace` should carry given every intent in it.
///
/// Protection is recomputed from the namespace passed in, never from a
/// previously written state.
#[must_use]
pub fn desired_labels(namespace: &Namespace, intents: &[NamespaceLabel]) -> Labels {
    merge_labels(&extract_protected(namespace), &intent_union(intents))
}
