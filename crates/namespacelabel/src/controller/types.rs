use super::Reconciler;
use crate::config::OperatorConfig;
use crate::store::StoreError;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("NamespaceLabel is missing a name or namespace")]
    MissingObjectKey,

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl Error {
    /// A version conflict on some write; the next attempt re-reads everything
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::StoreError(err) if err.is_conflict())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Shared state handed to every reconcile by the controller runtime
pub struct Context {
    pub reconciler: Reconciler,
    pub config: Arc<OperatorConfig>,
}
