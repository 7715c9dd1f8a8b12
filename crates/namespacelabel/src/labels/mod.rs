//! # Namespace label computation
//!
//! Pure functions deciding what a namespace's labels should be:
//! - [`classify`]: which keys belong to cluster management and must survive a sync
//! - [`merge`]: the full label set derived from protected labels and live intents
//! - [`claims`]: which labels a retracting intent must leave behind for other owners

pub mod claims;
pub mod classify;
pub mod merge;

pub use claims::{labels_still_claimed, retract_labels, ClaimedLabels};
pub use classify::{extract_protected, is_protected, PROTECTED_LABEL_MARKER};
pub use merge::{desired_labels, intent_union, merge_labels};

use std::collections::BTreeMap;

/// Label map, as stored on Kubernetes object metadata
pub type Labels = BTreeMap<String, String>;
