//! Error types for rudder-kube

use rudder_core::{CoreError, ReleaseStatus};
use rudder_engine::EngineError;
use thiserror::Error;

use crate::cluster::ClusterError;
use crate::reconcile::ReconcileError;

/// Result type for rudder-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors surfaced by the ledger and the orchestrator
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// An overlay could not be parsed into key/value pairs
    #[error("release '{name}': {source}")]
    MalformedOverlay { name: String, source: CoreError },

    /// The chart failed to render
    #[error("release '{name}': {source}")]
    Render { name: String, source: EngineError },

    /// Install requested but a deployed release already exists
    #[error("release '{name}' already exists\nHint: use `rudder upgrade {name}` to change it")]
    AlreadyExists { name: String },

    /// No deployed release to act upon
    #[error("release '{name}' not found")]
    ReleaseNotFound { name: String },

    /// Rollback or lookup target absent from history
    #[error("release '{name}' has no revision {revision}")]
    NoSuchRevision { name: String, revision: u32 },

    /// Another operation holds the name lock
    #[error("another operation is in progress for release '{name}'")]
    NameLocked { name: String },

    /// Applying the manifests to the cluster failed
    #[error("release '{name}' revision {revision}: {source}")]
    Reconcile {
        name: String,
        revision: u32,
        source: ReconcileError,
    },

    #[error("invalid release name '{name}': {reason}")]
    InvalidReleaseName { name: String, reason: String },

    #[error("release '{name}' revision {revision} cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        revision: u32,
        from: ReleaseStatus,
        to: ReleaseStatus,
    },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("compression error: {0}")]
    Compression(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// Cluster call outside of reconciliation (status, drift)
    #[error("cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Kubernetes API error outside of reconciliation (client setup, discovery)
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Release name the error refers to, when there is one
    pub fn release_name(&self) -> Option<&str> {
        match self {
            Self::MalformedOverlay { name, .. }
            | Self::Render { name, .. }
            | Self::AlreadyExists { name }
            | Self::ReleaseNotFound { name }
            | Self::NoSuchRevision { name, .. }
            | Self::NameLocked { name }
            | Self::Reconcile { name, .. }
            | Self::InvalidReleaseName { name, .. }
            | Self::InvalidTransition { name, .. } => Some(name),
            _ => None,
        }
    }
}
