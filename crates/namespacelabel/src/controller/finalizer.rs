//! # Finalizer state machine
//!
//! `Unfinalized -> Finalized -> Removed`. The token is attached on the first
//! live reconcile and detached only after retraction has been written, so a
//! `NamespaceLabel` cannot disappear while its labels are still on the namespace.

use crate::crds::NamespaceLabel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerState {
    /// Object exists without our token
    Unfinalized,
    /// Object exists and carries our token
    Finalized,
    /// Object is gone from the store
    Removed,
}

impl FinalizerState {
    #[must_use]
    pub fn of(intent: Option<&NamespaceLabel>, token: &str) -> Self {
        match intent {
            None => Self::Removed,
            Some(intent) if intent.has_finalizer(token) => Self::Finalized,
            Some(_) => Self::Unfinalized,
        }
    }
}

/// What a reconcile must do with an existing object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerStep {
    /// Live, token missing: attach it, then sync
    Attach,
    /// Live, token present: sync
    Sync,
    /// Terminating, token present: retract labels, then detach
    Retract,
    /// Terminating without our token: someone else finalized it
    Ignore,
}

impl FinalizerStep {
    #[must_use]
    pub fn for_intent(intent: &NamespaceLabel, token: &str) -> Self {
        match (intent.is_terminating(), intent.has_finalizer(token)) {
            (false, false) => Self::Attach,
            (false, true) => Self::Sync,
            (true, true) => Self::Retract,
            (true, false) => Self::Ignore,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizerOp {
    Attach,
    Detach,
}

/// Apply `op` to the object's finalizer list. Returns whether anything changed,
/// so callers can skip a no-op write.
pub fn apply(op: FinalizerOp, intent: &mut NamespaceLabel, token: &str) -> bool {
    let finalizers = intent.metadata.finalizers.get_or_insert_with(Vec::new);
    match op {
        FinalizerOp::Attach => {
            if finalizers.iter().any(|f| f == token) {
                return false;
            }
            finalizers.push(token.to_string());
            true
        }
        FinalizerOp::Detach => {
            let before = finalizers.len();
            finalizers.retain(|f| f != token);
            finalizers.len() != before
        }
    }
}
