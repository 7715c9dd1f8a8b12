//! Protected label classification

use super::Labels;
use k8s_openapi::api::core::v1::Namespace;

/// Any label key containing this substring is owned by cluster management.
pub const PROTECTED_LABEL_MARKER: &str = "kubernetes.io";

/// Unanchored substring match. A user key that happens to contain the marker
/// is treated as protected too.
#[must_use]
pub fn is_protected(key: &str) -> bool {
    key.contains(PROTECTED_LABEL_MARKER)
}

/// Protected labels currently on `namespace`
#[must_use]
pub fn extract_protected(namespace: &Namespace) -> Labels {
    namespace
        .metadata
        .labels
        .iter()
        .flatten()
        .filter(|(key, _)| is_protected(key))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
