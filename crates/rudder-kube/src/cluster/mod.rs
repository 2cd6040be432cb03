//! Cluster API seam used by the reconciler
//!
//! The reconciler only ever talks to a cluster through [`ClusterApi`].
//! Two implementations ship with the crate:
//! - [`FakeCluster`]: in-memory, scriptable, for tests and dry runs
//! - [`KubeCluster`]: a real cluster through the `kube` dynamic API

mod fake;
mod live;

pub use self::fake::{CallRecord, ClusterCall, FakeCluster};
pub use self::live::KubeCluster;

use async_trait::async_trait;
use rudder_core::{Manifest, ResourceKey};
use std::time::Duration;
use thiserror::Error;

/// Failure of a single cluster call
///
/// The distinction drives retries: transient failures (and timeouts) are
/// retried with backoff, permanent ones fail the operation at once.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClusterError {
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

impl ClusterError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Timeout(_))
    }
}

/// Operations the reconciler issues against a cluster
#[async_trait]
pub trait ClusterApi: Send + Sync {
    async fn create_resource(&self, manifest: &Manifest) -> Result<(), ClusterError>;

    async fn update_resource(&self, manifest: &Manifest) -> Result<(), ClusterError>;

    /// Deleting a resource that does not exist succeeds
    async fn delete_resource(&self, key: &ResourceKey) -> Result<(), ClusterError>;

    async fn get_resource(&self, key: &ResourceKey) -> Result<Option<Manifest>, ClusterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ClusterError::Transient("busy".into()).is_transient());
        assert!(ClusterError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ClusterError::Permanent("forbidden".into()).is_transient());
    }

    #[test]
    fn test_timeout_display() {
        let err = ClusterError::Timeout(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "timed out after 1.5s");
    }
}
