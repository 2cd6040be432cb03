//! Rudder Kube - release orchestration against Kubernetes
//!
//! This crate provides:
//! - **Release Ledger**: per-name revision history with advisory name locks,
//!   persisted in memory or on disk (where locks hold across processes)
//! - **Reconciler**: plans create/update/delete operations between two manifest
//!   sets and applies them on a bounded worker pool with retries
//! - **Cluster API**: a narrow trait over the cluster, with an in-memory fake and
//!   a `kube` adapter
//! - **Orchestrator**: install, upgrade, rollback and uninstall state machine
//! - **Diff Engine**: compare revisions and detect cluster drift

pub mod actions;
pub mod cluster;
pub mod config;
pub mod diff;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod reconcile;

pub use actions::{InstallOptions, RollbackOptions, UninstallOptions, UpgradeOptions};
pub use cluster::{CallRecord, ClusterApi, ClusterCall, ClusterError, FakeCluster, KubeCluster};
pub use config::{CONFIG_ENV, ReconcileConfig, RudderConfig, StorageConfig};
pub use diff::{ChangeType, DiffEngine, DiffResult, ResourceChange};
pub use error::{KubeError, Result};
pub use ledger::{
    CompressionMethod, FileStore, LedgerStore, MemoryStore, NameLock, OperationCounts,
    ReleaseLedger, StoreLock,
};
pub use orchestrator::{Orchestrator, ReleaseOutcome, StatusReport, validate_release_name};
pub use reconcile::{
    CancelToken, DefaultOrdering, OperationKind, OperationOutcome, OrderingStrategy, Plan,
    PlannedOp, ReconcileError, ReconcileResult, Reconciler, ResourceCategory, RetryPolicy,
};
