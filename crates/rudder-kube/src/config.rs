//! Configuration file
//!
//! ```yaml
//! namespace: default
//! reconcile:
//!   workers: 4
//!   retry:
//!     max_attempts: 5
//!     initial_backoff: 200ms
//!     max_backoff: 10s
//!     multiplier: 2.0
//!     operation_timeout: 30s
//! storage:
//!   path: /var/lib/rudder/releases
//!   compression:
//!     method: zstd
//!     level: 3
//! ```
//!
//! Looked up from an explicit path, then `$RUDDER_CONFIG`, then
//! `<config dir>/rudder/config.yaml`. Missing file means defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::cluster::ClusterApi;
use crate::error::{KubeError, Result};
use crate::ledger::CompressionMethod;
use crate::reconcile::{DEFAULT_WORKERS, Reconciler, RetryPolicy};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "RUDDER_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RudderConfig {
    /// Namespace for namespaced resources that do not set one
    pub namespace: String,

    pub reconcile: ReconcileConfig,

    pub storage: StorageConfig,
}

impl Default for RudderConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            reconcile: ReconcileConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Concurrent cluster operations
    pub workers: usize,

    pub retry: RetryPolicy,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Ledger directory; defaults to `<data dir>/rudder/releases`
    pub path: Option<PathBuf>,

    pub compression: CompressionMethod,
}

impl RudderConfig {
    /// Load from `explicit`, `$RUDDER_CONFIG` or the default location
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => {
                debug!("no configuration file, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "loading configuration");
        let content = std::fs::read_to_string(path).map_err(|e| {
            KubeError::InvalidConfig(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content).map_err(|e| match e {
            KubeError::InvalidConfig(msg) => {
                KubeError::InvalidConfig(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content).map_err(|e| KubeError::InvalidConfig(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/rudder/config.yaml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("rudder").join("config.yaml"))
    }

    pub fn validate(&self) -> Result<()> {
        let retry = &self.reconcile.retry;

        if self.reconcile.workers == 0 {
            return Err(KubeError::InvalidConfig(
                "reconcile.workers must be at least 1".to_string(),
            ));
        }
        if retry.max_attempts == 0 {
            return Err(KubeError::InvalidConfig(
                "reconcile.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if retry.multiplier.is_nan() || retry.multiplier < 1.0 {
            return Err(KubeError::InvalidConfig(
                "reconcile.retry.multiplier must be at least 1.0".to_string(),
            ));
        }
        if retry.operation_timeout.is_zero() {
            return Err(KubeError::InvalidConfig(
                "reconcile.retry.operation_timeout must be positive".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(KubeError::InvalidConfig("namespace must not be empty".to_string()));
        }
        Ok(())
    }

    /// Ledger directory, falling back to the platform data dir
    pub fn storage_path(&self) -> PathBuf {
        self.storage.path.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("rudder")
                .join("releases")
        })
    }

    /// Reconciler over `cluster` with the configured policy and workers
    pub fn reconciler(&self, cluster: Arc<dyn ClusterApi>) -> Reconciler {
        Reconciler::new(cluster)
            .with_policy(self.reconcile.retry.clone())
            .with_workers(self.reconcile.workers)
    }
}
