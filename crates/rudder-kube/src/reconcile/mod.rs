//! Reconciler: plan and apply the operations between two manifest sets
//!
//! Operations run on a bounded worker pool in an order given by an
//! [`OrderingStrategy`]. Each attempt has its own timeout; transient failures
//! are retried with exponential backoff. The first operation that runs out of
//! attempts stops further dispatch, lets in-flight operations finish and fails
//! the whole apply with the partial result. Nothing is rolled back.

mod ordering;
mod plan;
mod retry;

pub use ordering::{DefaultOrdering, OrderingStrategy, ResourceCategory};
pub use plan::{OperationKind, Plan, PlannedOp, plan};
pub use retry::{CancelToken, RetryPolicy};

use rudder_core::{ManifestSet, ResourceKey};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, debug, info, warn};

use crate::cluster::{ClusterApi, ClusterError};

/// Default number of concurrent operations
pub const DEFAULT_WORKERS: usize = 4;

/// Outcome of one planned operation
#[derive(Debug, Clone, PartialEq)]
pub struct OperationOutcome {
    pub op: OperationKind,
    pub resource: ResourceKey,
    pub applied: bool,
    pub attempts: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
}

/// What an apply did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileResult {
    /// Finished operations, in completion order
    pub operations: Vec<OperationOutcome>,

    /// Resources that needed no operation
    pub unchanged: Vec<ResourceKey>,
}

impl ReconcileResult {
    /// Applied operations of one kind
    pub fn count(&self, kind: OperationKind) -> usize {
        self.operations
            .iter()
            .filter(|o| o.applied && o.op == kind)
            .count()
    }

    pub fn created(&self) -> usize {
        self.count(OperationKind::Create)
    }

    pub fn updated(&self) -> usize {
        self.count(OperationKind::Update)
    }

    pub fn deleted(&self) -> usize {
        self.count(OperationKind::Delete)
    }

    pub fn applied(&self) -> usize {
        self.operations.iter().filter(|o| o.applied).count()
    }

    /// Whether the apply issued no operation at all
    pub fn is_noop(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn outcome(&self, resource: &ResourceKey) -> Option<&OperationOutcome> {
        self.operations.iter().find(|o| &o.resource == resource)
    }
}

/// Reconciliation failure
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// An operation failed permanently or ran out of attempts
    #[error("{op} {resource} failed after {attempts} attempt(s): {cause}")]
    Operation {
        op: OperationKind,
        resource: ResourceKey,
        attempts: u32,
        #[source]
        cause: ClusterError,
        partial: Box<ReconcileResult>,
    },

    /// The ordering has a cycle; nothing was applied
    #[error("dependency cycle between {}", join_keys(.members))]
    DependencyCycle { members: Vec<ResourceKey> },

    #[error("reconciliation cancelled after {} operation(s)", .partial.applied())]
    Cancelled { partial: Box<ReconcileResult> },
}

impl ReconcileError {
    /// Operations completed before the failure
    pub fn partial(&self) -> Option<&ReconcileResult> {
        match self {
            Self::Operation { partial, .. } | Self::Cancelled { partial } => Some(partial),
            Self::DependencyCycle { .. } => None,
        }
    }
}

fn join_keys(keys: &[ResourceKey]) -> String {
    keys.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Applies plans against a cluster
pub struct Reconciler {
    cluster: Arc<dyn ClusterApi>,
    policy: RetryPolicy,
    workers: usize,
    ordering: Arc<dyn OrderingStrategy>,
}

impl Reconciler {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            policy: RetryPolicy::default(),
            workers: DEFAULT_WORKERS,
            ordering: Arc::new(DefaultOrdering),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Concurrent operations, at least one
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_ordering(mut self, ordering: Arc<dyn OrderingStrategy>) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Plan and apply the move from `previous` to `desired`
    pub async fn apply(
        &self,
        desired: &ManifestSet,
        previous: &ManifestSet,
        cancel: &CancelToken,
    ) -> Result<ReconcileResult, ReconcileError> {
        self.execute(plan(desired, previous), cancel).await
    }

    /// Apply an already computed plan
    pub async fn execute(
        &self,
        plan: Plan,
        cancel: &CancelToken,
    ) -> Result<ReconcileResult, ReconcileError> {
        let Plan { ops, unchanged } = plan;
        let mut result = ReconcileResult {
            operations: Vec::with_capacity(ops.len()),
            unchanged,
        };

        if ops.is_empty() {
            debug!("nothing to apply");
            return Ok(result);
        }

        let waits = self.ordering.dependencies(&ops);
        check_acyclic(&ops, &waits)?;

        if cancel.is_cancelled() {
            return Err(ReconcileError::Cancelled {
                partial: Box::new(result),
            });
        }

        info!(
            operations = ops.len(),
            unchanged = result.unchanged.len(),
            workers = self.workers,
            "applying plan"
        );

        let mut pending: Vec<usize> = waits.iter().map(Vec::len).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
        for (i, deps) in waits.iter().enumerate() {
            for &j in deps {
                dependents[j].push(i);
            }
        }
        let mut ready: VecDeque<usize> = (0..ops.len()).filter(|&i| pending[i] == 0).collect();

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, usize> = HashMap::new();
        let mut failure: Option<(usize, u32, ClusterError)> = None;
        let mut cancelled = false;

        loop {
            while failure.is_none() && !cancelled && !ready.is_empty() {
                if cancel.is_cancelled() {
                    info!("cancelled, no further operations will be issued");
                    cancelled = true;
                    break;
                }
                let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                    break;
                };
                let Some(index) = ready.pop_front() else {
                    break;
                };

                let op = ops[index].clone();
                let cluster = Arc::clone(&self.cluster);
                let policy = self.policy.clone();
                let handle = tasks.spawn(
                    async move {
                        let _permit = permit;
                        run_operation(cluster.as_ref(), &op, &policy).await
                    }
                    .in_current_span(),
                );
                in_flight.insert(handle.id(), index);
            }

            let Some(joined) = tasks.join_next_with_id().await else {
                break;
            };

            match joined {
                Ok((id, (outcome, error))) => {
                    let Some(index) = in_flight.remove(&id) else {
                        continue;
                    };
                    let attempts = outcome.attempts;
                    result.operations.push(outcome);

                    match error {
                        None => {
                            for &next in &dependents[index] {
                                pending[next] -= 1;
                                if pending[next] == 0 {
                                    ready.push_back(next);
                                }
                            }
                        }
                        Some(err) => {
                            if failure.is_none() {
                                failure = Some((index, attempts, err));
                            }
                        }
                    }
                }
                Err(join_error) => {
                    let index = in_flight.remove(&join_error.id());
                    warn!(error = %join_error, "operation task aborted");
                    if let (None, Some(index)) = (&failure, index) {
                        failure = Some((
                            index,
                            1,
                            ClusterError::Permanent(join_error.to_string()),
                        ));
                    }
                }
            }
        }

        if let Some((index, attempts, cause)) = failure {
            let op = &ops[index];
            return Err(ReconcileError::Operation {
                op: op.kind,
                resource: op.key.clone(),
                attempts,
                cause,
                partial: Box::new(result),
            });
        }

        if cancelled {
            return Err(ReconcileError::Cancelled {
                partial: Box::new(result),
            });
        }

        info!(
            created = result.created(),
            updated = result.updated(),
            deleted = result.deleted(),
            "plan applied"
        );
        Ok(result)
    }
}

/// Issue one operation, retrying transient failures
async fn run_operation(
    cluster: &dyn ClusterApi,
    op: &PlannedOp,
    policy: &RetryPolicy,
) -> (OperationOutcome, Option<ClusterError>) {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;

        let call = async {
            match op.kind {
                OperationKind::Create => cluster.create_resource(&op.manifest).await,
                OperationKind::Update => cluster.update_resource(&op.manifest).await,
                OperationKind::Delete => cluster.delete_resource(&op.key).await,
            }
        };
        let outcome = tokio::time::timeout(policy.operation_timeout, call)
            .await
            .unwrap_or(Err(ClusterError::Timeout(policy.operation_timeout)));

        let err = match outcome {
            Ok(()) => {
                debug!(resource = %op.key, op = %op.kind, attempt, "applied");
                return (
                    OperationOutcome {
                        op: op.kind,
                        resource: op.key.clone(),
                        applied: true,
                        attempts: attempt,
                        elapsed: started.elapsed(),
                        error: None,
                    },
                    None,
                );
            }
            Err(err) => err,
        };

        if policy.should_retry(&err, attempt) {
            let delay = policy.backoff(attempt);
            warn!(resource = %op.key, op = %op.kind, attempt, error = %err, ?delay, "retrying");
            tokio::time::sleep(delay).await;
            continue;
        }

        warn!(resource = %op.key, op = %op.kind, attempt, error = %err, "giving up");
        return (
            OperationOutcome {
                op: op.kind,
                resource: op.key.clone(),
                applied: false,
                attempts: attempt,
                elapsed: started.elapsed(),
                error: Some(err.to_string()),
            },
            Some(err),
        );
    }
}

/// Reject orders that can never complete
fn check_acyclic(ops: &[PlannedOp], waits: &[Vec<usize>]) -> Result<(), ReconcileError> {
    let mut pending: Vec<usize> = waits.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); ops.len()];
    for (i, deps) in waits.iter().enumerate() {
        for &j in deps {
            dependents[j].push(i);
        }
    }

    let mut queue: VecDeque<usize> = (0..ops.len()).filter(|&i| pending[i] == 0).collect();
    let mut done = vec![false; ops.len()];
    while let Some(i) = queue.pop_front() {
        done[i] = true;
        for &next in &dependents[i] {
            pending[next] -= 1;
            if pending[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    let Some(start) = done.iter().position(|d| !d) else {
        return Ok(());
    };

    // every blocked operation waits on another blocked one, so walking
    // those edges from any of them ends on a cycle
    let mut path = vec![start];
    let mut seen = vec![None; ops.len()];
    seen[start] = Some(0);
    let mut current = start;
    loop {
        let Some(&next) = waits[current].iter().find(|&&j| !done[j]) else {
            break;
        };
        if let Some(position) = seen[next] {
            let members = path[position..]
                .iter()
                .map(|&i| ops[i].key.clone())
                .collect();
            return Err(ReconcileError::DependencyCycle { members });
        }
        seen[next] = Some(path.len());
        path.push(next);
        current = next;
    }

    Err(ReconcileError::DependencyCycle {
        members: path.iter().map(|&i| ops[i].key.clone()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterCall, FakeCluster};
    use rudder_core::Manifest;

    fn manifests(yaml: &str) -> ManifestSet {
        ManifestSet::from_yaml(yaml).unwrap()
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            multiplier: 2.0,
            operation_timeout: Duration::from_secs(5),
        }
    }

    fn reconciler(cluster: &FakeCluster) -> Reconciler {
        Reconciler::new(Arc::new(cluster.clone())).with_policy(fast_policy())
    }

    const APP: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 1\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n---\napiVersion: v1\nkind: Service\nmetadata:\n  name: web\n";

    #[tokio::test]
    async fn test_apply_from_empty_creates_everything() {
        let cluster = FakeCluster::new();
        let desired = manifests(APP);

        let result = reconciler(&cluster)
            .apply(&desired, &ManifestSet::new(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.created(), 3);
        assert_eq!(cluster.len(), 3);

        // config before network before workload
        let order: Vec<String> = cluster.calls().iter().map(|c| c.key.to_string()).collect();
        assert_eq!(order, vec!["ConfigMap/cfg", "Service/web", "Deployment/web"]);
    }

    #[tokio::test]
    async fn test_apply_same_state_issues_nothing() {
        let cluster = FakeCluster::new();
        let desired = manifests(APP);

        let result = reconciler(&cluster)
            .apply(&desired, &desired, &CancelToken::new())
            .await
            .unwrap();

        assert!(result.is_noop());
        assert_eq!(result.unchanged.len(), 3);
        assert_eq!(cluster.mutating_calls(), 0);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let cluster = FakeCluster::new();
        let previous = manifests(APP);
        let desired = manifests(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 3\n---\napiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n",
        );
        for m in &previous {
            cluster.put_out_of_band(m.clone());
        }

        let result = reconciler(&cluster)
            .apply(&desired, &previous, &CancelToken::new())
            .await
            .unwrap();

        assert_eq!((result.created(), result.updated(), result.deleted()), (0, 1, 1));
        assert!(!cluster.contains(&ResourceKey::new("Service", "web")));
        let deployment = cluster.get(&ResourceKey::new("Deployment", "web")).unwrap();
        assert_eq!(deployment.body["spec"]["replicas"], 3);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let cluster = FakeCluster::new();
        let key = ResourceKey::new("ConfigMap", "cfg");
        cluster.fail_transient(&key, 2);

        let result = reconciler(&cluster)
            .apply(&manifests(APP), &ManifestSet::new(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.outcome(&key).unwrap().attempts, 3);
        assert_eq!(cluster.len(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_stop_dependents() {
        let cluster = FakeCluster::new();
        let key = ResourceKey::new("ConfigMap", "cfg");
        cluster.fail_transient(&key, 10);

        let desired = manifests(
            "apiVersion: v1\nkind: ConfigMap\nmetadata:\n  name: cfg\n---\napiVersion: v1\nkind: Secret\nmetadata:\n  name: creds\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n",
        );
        let err = reconciler(&cluster)
            .apply(&desired, &ManifestSet::new(), &CancelToken::new())
            .await
            .unwrap_err();

        let ReconcileError::Operation {
            op,
            resource,
            attempts,
            cause,
            partial,
        } = err
        else {
            panic!("expected operation error");
        };
        assert_eq!(op, OperationKind::Create);
        assert_eq!(resource, key);
        assert_eq!(attempts, 3);
        assert!(cause.is_transient());

        // the sibling in the same category went through and stays applied
        assert!(cluster.contains(&ResourceKey::new("Secret", "creds")));
        assert_eq!(partial.created(), 1);
        // the deployment was never attempted
        assert!(!cluster
            .calls()
            .iter()
            .any(|c| c.key == ResourceKey::new("Deployment", "web")));
    }

    #[tokio::test]
    async fn test_permanent_failure_not_retried() {
        let cluster = FakeCluster::new();
        let key = ResourceKey::new("ConfigMap", "cfg");
        cluster.fail_permanent(&key, "forbidden");

        let err = reconciler(&cluster)
            .apply(&manifests(APP), &ManifestSet::new(), &CancelToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Operation { attempts: 1, .. }));
        assert_eq!(cluster.mutating_calls(), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let cluster = FakeCluster::new();
        let key = ResourceKey::new("ConfigMap", "cfg");
        cluster.delay(&key, Duration::from_millis(200));

        let policy = RetryPolicy {
            max_attempts: 2,
            operation_timeout: Duration::from_millis(20),
            ..fast_policy()
        };
        let err = Reconciler::new(Arc::new(cluster.clone()))
            .with_policy(policy)
            .apply(
                &manifests("kind: ConfigMap\nmetadata:\n  name: cfg\n"),
                &ManifestSet::new(),
                &CancelToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReconcileError::Operation {
                attempts: 2,
                cause: ClusterError::Timeout(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_cycle_rejected_before_any_call() {
        let cluster = FakeCluster::new();
        let desired = manifests(
            "kind: ConfigMap\nmetadata:\n  name: a\n  annotations:\n    rudder.io/depends-on: ConfigMap/b\n---\nkind: ConfigMap\nmetadata:\n  name: b\n  annotations:\n    rudder.io/depends-on: ConfigMap/a\n---\nkind: Secret\nmetadata:\n  name: free\n",
        );

        let err = reconciler(&cluster)
            .apply(&desired, &ManifestSet::new(), &CancelToken::new())
            .await
            .unwrap_err();

        let ReconcileError::DependencyCycle { members } = err else {
            panic!("expected a cycle");
        };
        let mut members: Vec<String> = members.iter().map(ToString::to_string).collect();
        members.sort();
        assert_eq!(members, vec!["ConfigMap/a", "ConfigMap/b"]);
        assert!(cluster.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_before_apply() {
        let cluster = FakeCluster::new();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = reconciler(&cluster)
            .apply(&manifests(APP), &ManifestSet::new(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, ReconcileError::Cancelled { ref partial } if partial.is_noop()));
        assert!(cluster.calls().is_empty());
    }

    /// Fake cluster that runs a hook before every create
    struct Hooked<F> {
        inner: FakeCluster,
        before_create: F,
    }

    #[async_trait::async_trait]
    impl<F: Fn(&ResourceKey) + Send + Sync> ClusterApi for Hooked<F> {
        async fn create_resource(&self, manifest: &Manifest) -> Result<(), ClusterError> {
            (self.before_create)(&manifest.key());
            self.inner.create_resource(manifest).await
        }

        async fn update_resource(&self, manifest: &Manifest) -> Result<(), ClusterError> {
            self.inner.update_resource(manifest).await
        }

        async fn delete_resource(&self, key: &ResourceKey) -> Result<(), ClusterError> {
            self.inner.delete_resource(key).await
        }

        async fn get_resource(&self, key: &ResourceKey) -> Result<Option<Manifest>, ClusterError> {
            self.inner.get_resource(key).await
        }
    }

    #[tokio::test]
    async fn test_cancel_during_apply_stops_dispatch() {
        let cluster = FakeCluster::new();
        let cancel = CancelToken::new();
        let config = ResourceKey::new("ConfigMap", "cfg");
        cluster.delay(&config, Duration::from_millis(20));

        let trigger = cancel.clone();
        let first = config.clone();
        let hooked = Hooked {
            inner: cluster.clone(),
            before_create: move |key: &ResourceKey| {
                if *key == first {
                    trigger.cancel();
                }
            },
        };

        let err = Reconciler::new(Arc::new(hooked))
            .with_policy(fast_policy())
            .apply(&manifests(APP), &ManifestSet::new(), &cancel)
            .await
            .unwrap_err();

        // the in-flight create finishes, nothing after it starts
        let ReconcileError::Cancelled { partial } = err else {
            panic!("expected cancellation");
        };
        assert_eq!(partial.created(), 1);
        assert!(partial.outcome(&config).unwrap().applied);
        let keys: Vec<ResourceKey> = cluster.calls().iter().map(|c| c.key.clone()).collect();
        assert_eq!(keys, vec![config.clone()]);
        assert_eq!(cluster.keys(), vec![config]);
    }

    #[tokio::test]
    async fn test_panicking_operation_is_reported_by_resource() {
        let cluster = FakeCluster::new();
        let mut desired = ManifestSet::new();
        for i in 0..3 {
            let m = Manifest::from_yaml(&format!("kind: ConfigMap\nmetadata:\n  name: cm-{}\n", i)).unwrap();
            desired.insert(m).unwrap();
        }
        // cm-0 is still running when cm-2 blows up
        cluster.delay(&ResourceKey::new("ConfigMap", "cm-0"), Duration::from_millis(50));

        let hooked = Hooked {
            inner: cluster.clone(),
            before_create: |key: &ResourceKey| {
                if key.name == "cm-2" {
                    panic!("driver bug");
                }
            },
        };

        let err = Reconciler::new(Arc::new(hooked))
            .with_policy(fast_policy())
            .with_workers(4)
            .apply(&desired, &ManifestSet::new(), &CancelToken::new())
            .await
            .unwrap_err();

        let ReconcileError::Operation { resource, cause, partial, .. } = err else {
            panic!("expected operation error");
        };
        assert_eq!(resource, ResourceKey::new("ConfigMap", "cm-2"));
        assert!(!cause.is_transient());
        // in-flight work still completes
        assert!(partial.outcome(&ResourceKey::new("ConfigMap", "cm-0")).unwrap().applied);
    }

    #[tokio::test]
    async fn test_worker_bound_respected() {
        let cluster = FakeCluster::new();
        let mut desired = ManifestSet::new();
        for i in 0..8 {
            let m = Manifest::from_yaml(&format!("kind: ConfigMap\nmetadata:\n  name: cm-{}\n", i)).unwrap();
            cluster.delay(&m.key(), Duration::from_millis(10));
            desired.insert(m).unwrap();
        }

        let result = reconciler(&cluster)
            .with_workers(2)
            .apply(&desired, &ManifestSet::new(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.created(), 8);
        assert!(cluster.max_in_flight() <= 2);
        assert!(cluster.max_in_flight() >= 1);
    }

    #[tokio::test]
    async fn test_deletes_dependents_first() {
        let cluster = FakeCluster::new();
        let previous = manifests(APP);
        for m in &previous {
            cluster.put_out_of_band(m.clone());
        }

        reconciler(&cluster)
            .apply(&ManifestSet::new(), &previous, &CancelToken::new())
            .await
            .unwrap();

        let order: Vec<String> = cluster
            .calls()
            .iter()
            .filter(|c| c.call == ClusterCall::Delete)
            .map(|c| c.key.to_string())
            .collect();
        assert_eq!(order, vec!["Deployment/web", "Service/web", "ConfigMap/cfg"]);
        assert!(cluster.is_empty());
    }

    #[test]
    fn test_error_display() {
        let err = ReconcileError::DependencyCycle {
            members: vec![ResourceKey::new("ConfigMap", "a"), ResourceKey::new("ConfigMap", "b")],
        };
        assert_eq!(err.to_string(), "dependency cycle between ConfigMap/a -> ConfigMap/b");
        assert!(err.partial().is_none());
    }
}
