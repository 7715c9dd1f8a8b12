//! `NamespaceLabel` Custom Resource Definition

use crate::store::ObjectKey;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Labels that should be present on the namespace this resource lives in.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[kube(
    group = "idandaniel.idandaniel.io",
    version = "v1",
    kind = "NamespaceLabel"
)]
#[kube(namespaced)]
#[kube(printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#)]
pub struct NamespaceLabelSpec {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NamespaceLabel {
    /// Build a `NamespaceLabel` in `namespace` declaring `labels`
    #[must_use]
    pub fn declaring(namespace: &str, name: &str, labels: BTreeMap<String, String>) -> Self {
        let mut intent = Self::new(name, NamespaceLabelSpec { labels });
        intent.metadata.namespace = Some(namespace.to_string());
        intent
    }

    /// True once deletion has been requested and the object only waits on finalizers
    #[must_use]
    pub fn is_terminating(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    #[must_use]
    pub fn has_finalizer(&self, token: &str) -> bool {
        self.finalizers().iter().any(|f| f == token)
    }

    #[must_use]
    pub fn declared_labels(&self) -> &BTreeMap<String, String> {
        &self.spec.labels
    }

    /// Store key of this object; `None` when name or namespace is missing
    #[must_use]
    pub fn object_key(&self) -> Option<ObjectKey> {
        let name = self.metadata.name.as_ref()?;
        let namespace = self.metadata.namespace.as_ref()?;
        Some(ObjectKey::namespaced(namespace, name))
    }
}
