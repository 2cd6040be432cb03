//! In-memory cluster for tests and dry runs
//!
//! Records every call, and can be scripted to fail (transiently or
//! permanently) or to stall on a given resource.

use async_trait::async_trait;
use rudder_core::{Manifest, ResourceKey};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::{ClusterApi, ClusterError};

/// Kind of call made against the fake cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClusterCall {
    Create,
    Update,
    Delete,
    Get,
}

/// One recorded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRecord {
    pub call: ClusterCall,
    pub key: ResourceKey,
    pub ok: bool,
}

#[derive(Default)]
struct FakeState {
    objects: BTreeMap<ResourceKey, Manifest>,
    calls: Vec<CallRecord>,
    transient_failures: HashMap<ResourceKey, u32>,
    permanent_failures: HashMap<ResourceKey, String>,
    delays: HashMap<ResourceKey, Duration>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory [`ClusterApi`] implementation
#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<FakeState>>,
}

/// Decrements the in-flight counter even when the call future is dropped
struct InFlight {
    state: Arc<Mutex<FakeState>>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The next `times` mutating calls on `key` fail with a transient error
    pub fn fail_transient(&self, key: &ResourceKey, times: u32) {
        self.lock().transient_failures.insert(key.clone(), times);
    }

    /// Every mutating call on `key` fails with a permanent error
    pub fn fail_permanent(&self, key: &ResourceKey, message: impl Into<String>) {
        self.lock()
            .permanent_failures
            .insert(key.clone(), message.into());
    }

    /// Mutating calls on `key` take `delay` before completing
    pub fn delay(&self, key: &ResourceKey, delay: Duration) {
        self.lock().delays.insert(key.clone(), delay);
    }

    /// Remove every scripted failure and delay
    pub fn clear_faults(&self) {
        let mut state = self.lock();
        state.transient_failures.clear();
        state.permanent_failures.clear();
        state.delays.clear();
    }

    pub fn get(&self, key: &ResourceKey) -> Option<Manifest> {
        self.lock().objects.get(key).cloned()
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.lock().objects.contains_key(key)
    }

    /// Keys of every stored object, sorted
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().objects.is_empty()
    }

    /// Change the cluster behind the reconciler's back
    pub fn put_out_of_band(&self, manifest: Manifest) {
        self.lock().objects.insert(manifest.key(), manifest);
    }

    pub fn remove_out_of_band(&self, key: &ResourceKey) {
        self.lock().objects.remove(key);
    }

    pub fn calls(&self) -> Vec<CallRecord> {
        self.lock().calls.clone()
    }

    /// Number of create/update/delete calls, failed ones included
    pub fn mutating_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.call != ClusterCall::Get)
            .count()
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    /// Highest number of concurrent mutating calls observed
    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    async fn mutate<F>(&self, call: ClusterCall, key: &ResourceKey, apply: F) -> Result<(), ClusterError>
    where
        F: FnOnce(&mut BTreeMap<ResourceKey, Manifest>),
    {
        let delay = {
            let mut state = self.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.delays.get(key).copied()
        };
        let _guard = InFlight {
            state: Arc::clone(&self.state),
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let outcome = if let Some(message) = state.permanent_failures.get(key).cloned() {
            Err(ClusterError::Permanent(message))
        } else if state.transient_failures.get(key).is_some_and(|n| *n > 0) {
            if let Some(remaining) = state.transient_failures.get_mut(key) {
                *remaining -= 1;
            }
            Err(ClusterError::Transient(format!("{} is not ready", key)))
        } else {
            apply(&mut state.objects);
            Ok(())
        };

        state.calls.push(CallRecord {
            call,
            key: key.clone(),
            ok: outcome.is_ok(),
        });
        outcome
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    /// Creating an existing object adopts it, like the kube adapter does
    async fn create_resource(&self, manifest: &Manifest) -> Result<(), ClusterError> {
        let key = manifest.key();
        self.mutate(ClusterCall::Create, &key, |objects| {
            objects.insert(manifest.key(), manifest.clone());
        })
        .await
    }

    async fn update_resource(&self, manifest: &Manifest) -> Result<(), ClusterError> {
        let key = manifest.key();
        self.mutate(ClusterCall::Update, &key, |objects| {
            objects.insert(manifest.key(), manifest.clone());
        })
        .await
    }

    async fn delete_resource(&self, key: &ResourceKey) -> Result<(), ClusterError> {
        self.mutate(ClusterCall::Delete, key, |objects| {
            objects.remove(key);
        })
        .await
    }

    async fn get_resource(&self, key: &ResourceKey) -> Result<Option<Manifest>, ClusterError> {
        let mut state = self.lock();
        let found = state.objects.get(key).cloned();
        state.calls.push(CallRecord {
            call: ClusterCall::Get,
            key: key.clone(),
            ok: true,
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_map(name: &str) -> Manifest {
        Manifest::from_yaml(&format!("kind: ConfigMap\nmetadata:\n  name: {}\n", name)).unwrap()
    }

    #[tokio::test]
    async fn test_create_update_delete() {
        let cluster = FakeCluster::new();
        let cm = config_map("cfg");

        cluster.create_resource(&cm).await.unwrap();
        assert!(cluster.contains(&cm.key()));

        cluster.update_resource(&cm).await.unwrap();
        cluster.delete_resource(&cm.key()).await.unwrap();
        assert!(cluster.is_empty());

        // deleting again is fine
        cluster.delete_resource(&cm.key()).await.unwrap();
        assert_eq!(cluster.mutating_calls(), 4);
    }

    #[tokio::test]
    async fn test_transient_failures_run_out() {
        let cluster = FakeCluster::new();
        let cm = config_map("cfg");
        cluster.fail_transient(&cm.key(), 2);

        assert!(matches!(
            cluster.create_resource(&cm).await,
            Err(ClusterError::Transient(_))
        ));
        assert!(cluster.create_resource(&cm).await.is_err());
        assert!(cluster.create_resource(&cm).await.is_ok());

        let oks: Vec<bool> = cluster.calls().iter().map(|c| c.ok).collect();
        assert_eq!(oks, vec![false, false, true]);
    }

    #[tokio::test]
    async fn test_permanent_failure() {
        let cluster = FakeCluster::new();
        let cm = config_map("cfg");
        cluster.fail_permanent(&cm.key(), "forbidden");

        assert_eq!(
            cluster.create_resource(&cm).await,
            Err(ClusterError::Permanent("forbidden".to_string()))
        );
        assert!(!cluster.contains(&cm.key()));

        cluster.clear_faults();
        assert!(cluster.create_resource(&cm).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_resource() {
        let cluster = FakeCluster::new();
        let cm = config_map("cfg");
        cluster.put_out_of_band(cm.clone());

        assert_eq!(cluster.get_resource(&cm.key()).await.unwrap(), Some(cm.clone()));
        cluster.remove_out_of_band(&cm.key());
        assert_eq!(cluster.get_resource(&cm.key()).await.unwrap(), None);
        assert_eq!(cluster.mutating_calls(), 0);
    }
}
