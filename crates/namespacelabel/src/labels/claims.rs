//! Multi-owner bookkeeping for retraction

use super::Labels;
use crate::crds::NamespaceLabel;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};

/// Label pairs still declared by surviving intents. A key can be claimed with
/// several values when intents disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimedLabels(BTreeMap<String, BTreeSet<String>>);

impl ClaimedLabels {
    #[must_use]
    pub fn claims(&self, key: &str, value: &str) -> bool {
        self.0.get(key).is_some_and(|values| values.contains(value))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn insert(&mut self, key: &str, value: &str) {
        self.0
            .entry(key.to_string())
            .or_default()
            .insert(value.to_string());
    }
}

/// Claims held by every surviving intent other than the one named `excluding`.
///
/// Identity is by name; an intent with identical content but a different name
/// still counts as another owner.
#[must_use]
pub fn labels_still_claimed(intents: &[NamespaceLabel], excluding: &str) -> ClaimedLabels {
    let mut claimed = ClaimedLabels::default();
    for intent in intents
        .iter()
        .filter(|intent| intent.name_any() != excluding && !intent.is_terminating())
    {
        for (key, value) in intent.declared_labels() {
            claimed.insert(key, value);
        }
    }
    claimed
}

/// Labels left on the namespace after retracting `retracting`.
///
/// A pair is removed only if the namespace currently holds that exact value
/// and no surviving intent claims it.
#[must_use]
pub fn retract_labels(current: &Labels, retracting: &Labels, claimed: &ClaimedLabels) -> Labels {
    let mut remaining = current.clone();
    for (key, value) in retracting {
        if current.get(key) == Some(value) && !claimed.claims(key, value) {
            remaining.remove(key);
        }
    }
    remaining
}
