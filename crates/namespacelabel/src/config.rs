//! Operator Configuration
//!
//! Loaded from a mounted ConfigMap file (YAML, camelCase keys). Every field has
//! a default so a partial file is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Finalizer token placed on every `NamespaceLabel` this operator manages
pub const DEFAULT_FINALIZER: &str = "namespacelabels.idandaniel.idandaniel.io/finalizer";

/// Main operator configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperatorConfig {
    /// Finalizer token that gates `NamespaceLabel` deletion
    #[serde(default = "default_finalizer")]
    pub finalizer: String,

    /// Restrict the controller to a single namespace; all namespaces when unset
    #[serde(default)]
    pub watch_namespace: Option<String>,

    /// Also reconcile when a Namespace object itself changes
    #[serde(default = "default_true")]
    pub watch_namespace_changes: bool,

    /// Delete a `NamespaceLabel` whose namespace no longer exists
    #[serde(default = "default_true")]
    pub delete_orphaned_intents: bool,

    #[serde(default)]
    pub requeue: RequeueConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,
}

/// Retry delays handed to the controller runtime after a failed reconcile
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueConfig {
    /// Delay after an optimistic-concurrency conflict
    #[serde(default = "default_conflict_seconds")]
    pub conflict_seconds: u64,

    /// Delay after any other store error
    #[serde(default = "default_error_seconds")]
    pub error_seconds: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,

    /// `EnvFilter` directives used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Address for the health and readiness endpoints
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

fn default_finalizer() -> String {
    DEFAULT_FINALIZER.to_string()
}

fn default_true() -> bool {
    true
}

fn default_conflict_seconds() -> u64 {
    1
}

fn default_error_seconds() -> u64 {
    15
}

fn default_log_filter() -> String {
    "info,namespacelabel=debug".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            conflict_seconds: default_conflict_seconds(),
            error_seconds: default_error_seconds(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            finalizer: default_finalizer(),
            watch_namespace: None,
            watch_namespace_changes: true,
            delete_orphaned_intents: true,
            requeue: RequeueConfig::default(),
            logging: LoggingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl RequeueConfig {
    #[must_use]
    pub fn conflict_delay(&self) -> Duration {
        Duration::from_secs(self.conflict_seconds)
    }

    #[must_use]
    pub fn error_delay(&self) -> Duration {
        Duration::from_secs(self.error_seconds)
    }
}

impl OperatorConfig {
    /// Validate that configuration values are usable
    pub fn validate(&self) -> Result<(), anyhow::Error> {
        let Some((domain, name)) = self.finalizer.split_once('/') else {
            return Err(anyhow::anyhow!(
                "Finalizer '{}' must be a qualified name of the form <domain>/<name>",
                self.finalizer
            ));
        };
        if domain.is_empty() || name.is_empty() || name.contains('/') {
            return Err(anyhow::anyhow!(
                "Finalizer '{}' must be a qualified name of the form <domain>/<name>",
                self.finalizer
            ));
        }

        if self.requeue.conflict_seconds == 0 || self.requeue.error_seconds == 0 {
            return Err(anyhow::anyhow!(
                "requeue.conflictSeconds and requeue.errorSeconds must be greater than zero"
            ));
        }

        if let Some(namespace) = &self.watch_namespace {
            if namespace.trim().is_empty() {
                return Err(anyhow::anyhow!(
                    "watchNamespace must not be blank; omit it to watch all namespaces"
                ));
            }
        }

        Ok(())
    }

    /// Load configuration from mounted ConfigMap file
    pub fn from_mounted_file(config_path: impl AsRef<Path>) -> Result<Self, anyhow::Error> {
        let config_path = config_path.as_ref();
        let config_str = std::fs::read_to_string(config_path).map_err(|e| {
            anyhow::anyhow!("Failed to read config file {}: {e}", config_path.display())
        })?;

        serde_yaml::from_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
    }
}
