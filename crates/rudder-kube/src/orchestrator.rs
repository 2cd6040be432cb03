//! Release lifecycle: install, upgrade, rollback, uninstall
//!
//! Every mutating operation holds the release's name lock for its whole
//! critical section:
//! resolve values -> render -> append pending revision -> reconcile -> mark
//! deployed or failed.
//!
//! Overlay and render failures happen before anything is recorded. A failed
//! reconcile leaves the new revision `failed` and the previously deployed
//! revision `deployed`; a failed uninstall leaves the revision `deployed`.
//! Applied operations are not compensated.

use rudder_core::{
    Chart, ManifestSet, Operation, Overlay, Release, ReleaseStatus, Values, resolve,
};
use rudder_engine::{Rendered, Renderer};
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};

use crate::actions::{InstallOptions, RollbackOptions, UninstallOptions, UpgradeOptions};
use crate::cluster::ClusterApi;
use crate::diff::{DiffEngine, DiffResult};
use crate::error::{KubeError, Result};
use crate::ledger::{LedgerStore, NameLock, ReleaseLedger};
use crate::reconcile::{CancelToken, Plan, ReconcileResult, Reconciler, plan};

/// Longest accepted release name
pub const MAX_RELEASE_NAME_LEN: usize = 53;

/// Result of a lifecycle operation
#[derive(Debug, Clone)]
pub struct ReleaseOutcome {
    /// The revision as recorded (or as it would be, for dry runs)
    pub release: Release,

    /// Operations planned against the cluster
    pub plan: Plan,

    /// What reconciliation did; `None` for dry runs
    pub result: Option<ReconcileResult>,
}

impl ReleaseOutcome {
    pub fn is_dry_run(&self) -> bool {
        self.result.is_none()
    }
}

/// Latest revision of a release, with optional drift against the cluster
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub release: Release,
    pub drift: Option<DiffResult>,
}

/// Drives releases through their lifecycle
pub struct Orchestrator<S: LedgerStore> {
    ledger: ReleaseLedger<S>,
    renderer: Renderer,
    reconciler: Reconciler,
    diff_engine: DiffEngine,
}

impl<S: LedgerStore> Orchestrator<S> {
    pub fn new(store: S, reconciler: Reconciler) -> Self {
        Self {
            ledger: ReleaseLedger::new(store),
            renderer: Renderer::new(),
            reconciler,
            diff_engine: DiffEngine::new(),
        }
    }

    pub fn with_renderer(mut self, renderer: Renderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn ledger(&self) -> &ReleaseLedger<S> {
        &self.ledger
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        self.reconciler.cluster()
    }

    // ========== Install ==========

    /// Install a new release
    pub async fn install(
        &self,
        name: &str,
        chart: &Chart,
        overlays: &[Overlay],
        options: &InstallOptions,
    ) -> Result<ReleaseOutcome> {
        validate_release_name(name)?;
        let lock = self.guard(name, options.dry_run)?;
        self.install_locked(lock.as_ref(), name, chart, overlays, options)
            .await
    }

    async fn install_locked(
        &self,
        lock: Option<&NameLock<'_, S>>,
        name: &str,
        chart: &Chart,
        overlays: &[Overlay],
        options: &InstallOptions,
    ) -> Result<ReleaseOutcome> {
        if self.ledger.latest_deployed(name).await?.is_some() {
            return Err(KubeError::AlreadyExists {
                name: name.to_string(),
            });
        }

        let values = resolve_values(name, &chart.defaults, overlays)?;
        let rendered = self.render(name, chart, &values)?;

        let release = Release::pending(
            name,
            chart.chart_ref(),
            values,
            rendered.manifests,
            Operation::Install,
        )
        .with_notes(rendered.notes)
        .with_description(options.description.clone().or_else(|| Some("Install complete".to_string())));

        info!(release = name, chart = %chart.chart_ref(), "installing");
        self.deploy(lock, release, &ManifestSet::new(), &options.cancel)
            .await
    }

    // ========== Upgrade ==========

    /// Move a deployed release to a new chart and/or values
    pub async fn upgrade(
        &self,
        name: &str,
        chart: &Chart,
        overlays: &[Overlay],
        options: &UpgradeOptions,
    ) -> Result<ReleaseOutcome> {
        validate_release_name(name)?;
        let lock = self.guard(name, options.dry_run)?;

        let Some(current) = self.ledger.latest_deployed(name).await? else {
            if options.install {
                info!(release = name, "no deployed release, installing instead");
                return self
                    .install_locked(lock.as_ref(), name, chart, overlays, &options.to_install())
                    .await;
            }
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
            });
        };

        let base = if options.reuse_values {
            let mut base = chart.defaults.clone();
            base.merge(&current.values);
            base
        } else {
            chart.defaults.clone()
        };
        let values = resolve_values(name, &base, overlays)?;
        let rendered = self.render(name, chart, &values)?;

        let release = Release::pending(
            name,
            chart.chart_ref(),
            values,
            rendered.manifests,
            Operation::Upgrade,
        )
        .with_notes(rendered.notes)
        .with_description(options.description.clone().or_else(|| Some("Upgrade complete".to_string())));

        info!(
            release = name,
            from = current.revision,
            chart = %chart.chart_ref(),
            "upgrading"
        );
        self.deploy(lock.as_ref(), release, &current.manifests, &options.cancel)
            .await
    }

    // ========== Rollback ==========

    /// Re-deploy the content of an earlier revision as a new revision
    ///
    /// Without `target`, goes back to the revision just before the deployed one.
    pub async fn rollback(
        &self,
        name: &str,
        target: Option<u32>,
        options: &RollbackOptions,
    ) -> Result<ReleaseOutcome> {
        validate_release_name(name)?;
        let lock = self.guard(name, options.dry_run)?;

        let current = self
            .ledger
            .latest_deployed(name)
            .await?
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
            })?;

        let target = target.unwrap_or(current.revision.saturating_sub(1));
        let source = self.ledger.get(name, target).await?;

        let release = source
            .copy_for(Operation::Rollback { target })
            .with_description(
                options
                    .description
                    .clone()
                    .or_else(|| Some(format!("Rollback to {}", target))),
            );

        info!(release = name, from = current.revision, target, "rolling back");
        self.deploy(lock.as_ref(), release, &current.manifests, &options.cancel)
            .await
    }

    // ========== Uninstall ==========

    /// Delete every resource of the deployed revision
    ///
    /// The deployed revision becomes `uninstalled`; a later install continues
    /// the revision sequence. When a delete fails the revision stays
    /// `deployed` with the failure recorded, so the uninstall can be retried.
    pub async fn uninstall(&self, name: &str, options: &UninstallOptions) -> Result<ReleaseOutcome> {
        validate_release_name(name)?;
        let lock = self.guard(name, options.dry_run)?;

        let current = self
            .ledger
            .latest_deployed(name)
            .await?
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
            })?;

        let plan = plan(&ManifestSet::new(), &current.manifests);
        let Some(lock) = lock else {
            return Ok(ReleaseOutcome {
                release: current,
                plan,
                result: None,
            });
        };

        info!(release = name, revision = current.revision, "uninstalling");
        let revision = current.revision;
        let span = info_span!("reconcile", release = name, revision);

        match self
            .reconciler
            .execute(plan.clone(), &options.cancel)
            .instrument(span)
            .await
        {
            Ok(result) => {
                let release = lock
                    .mark_status(revision, ReleaseStatus::Uninstalled, None)
                    .await?;
                Ok(ReleaseOutcome {
                    release,
                    plan,
                    result: Some(result),
                })
            }
            Err(err) => {
                warn!(release = name, revision, error = %err, "uninstall failed");
                lock.record_failure(revision, format!("uninstall failed: {}", err))
                    .await?;
                Err(KubeError::Reconcile {
                    name: name.to_string(),
                    revision,
                    source: err,
                })
            }
        }
    }

    // ========== Read operations ==========

    /// Every revision, oldest first
    pub async fn history(&self, name: &str) -> Result<Vec<Release>> {
        let history = self.ledger.history(name).await?;
        if history.is_empty() {
            return Err(KubeError::ReleaseNotFound {
                name: name.to_string(),
            });
        }
        Ok(history)
    }

    /// Latest revision, plus drift against the cluster when requested and deployed
    pub async fn status(&self, name: &str, check_drift: bool) -> Result<StatusReport> {
        let release = self
            .ledger
            .latest(name)
            .await?
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
            })?;

        let drift = if check_drift && release.is_deployed() {
            Some(
                self.diff_engine
                    .detect_drift(&release, self.cluster().as_ref())
                    .await?,
            )
        } else {
            None
        };

        Ok(StatusReport { release, drift })
    }

    /// Manifest changes between two revisions
    pub async fn diff(&self, name: &str, from: u32, to: u32) -> Result<DiffResult> {
        let old = self.ledger.get(name, from).await?;
        let new = self.ledger.get(name, to).await?;
        self.diff_engine.diff_releases(&old, &new)
    }

    /// Names of every recorded release
    pub async fn list(&self) -> Result<Vec<String>> {
        self.ledger.names().await
    }

    /// Resolve and render without recording anything
    pub fn template(&self, name: &str, chart: &Chart, overlays: &[Overlay]) -> Result<Rendered> {
        validate_release_name(name)?;
        let values = resolve_values(name, &chart.defaults, overlays)?;
        self.render(name, chart, &values)
    }

    // ========== Internals ==========

    fn guard(&self, name: &str, dry_run: bool) -> Result<Option<NameLock<'_, S>>> {
        if dry_run {
            Ok(None)
        } else {
            self.ledger.lock(name).map(Some)
        }
    }

    fn render(&self, name: &str, chart: &Chart, values: &Values) -> Result<Rendered> {
        self.renderer
            .render_release(chart, values, name)
            .map_err(|source| KubeError::Render {
                name: name.to_string(),
                source,
            })
    }

    /// Append `release` as pending, reconcile from `previous`, record the outcome
    ///
    /// Without a lock (dry run) only the plan is computed.
    async fn deploy(
        &self,
        lock: Option<&NameLock<'_, S>>,
        mut release: Release,
        previous: &ManifestSet,
        cancel: &CancelToken,
    ) -> Result<ReleaseOutcome> {
        let name = release.name.clone();
        let plan = plan(&release.manifests, previous);

        let Some(lock) = lock else {
            release.revision = self
                .ledger
                .latest(&name)
                .await?
                .map(|r| r.revision)
                .unwrap_or(0)
                + 1;
            return Ok(ReleaseOutcome {
                release,
                plan,
                result: None,
            });
        };

        let revision = lock.append(release).await?;
        let span = info_span!("reconcile", release = %name, revision);

        match self
            .reconciler
            .execute(plan.clone(), cancel)
            .instrument(span)
            .await
        {
            Ok(result) => {
                let release = lock
                    .mark_status(revision, ReleaseStatus::Deployed, None)
                    .await?;
                info!(
                    release = %name,
                    revision,
                    created = result.created(),
                    updated = result.updated(),
                    deleted = result.deleted(),
                    "deployed"
                );
                Ok(ReleaseOutcome {
                    release,
                    plan,
                    result: Some(result),
                })
            }
            Err(err) => {
                warn!(release = %name, revision, error = %err, "reconcile failed");
                lock.mark_status(revision, ReleaseStatus::Failed, Some(err.to_string()))
                    .await?;
                Err(KubeError::Reconcile {
                    name,
                    revision,
                    source: err,
                })
            }
        }
    }
}

fn resolve_values(name: &str, defaults: &Values, overlays: &[Overlay]) -> Result<Values> {
    resolve(defaults, overlays).map_err(|source| KubeError::MalformedOverlay {
        name: name.to_string(),
        source,
    })
}

/// Release names are lowercase RFC 1123 labels of at most 53 characters
pub fn validate_release_name(name: &str) -> Result<()> {
    let invalid = |reason: &str| {
        Err(KubeError::InvalidReleaseName {
            name: name.to_string(),
            reason: reason.to_string(),
        })
    };

    if name.is_empty() {
        return invalid("must not be empty");
    }
    if name.len() > MAX_RELEASE_NAME_LEN {
        return invalid("must be at most 53 characters");
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return invalid("may only contain lowercase letters, digits and '-'");
    }
    if name.starts_with('-') || name.ends_with('-') {
        return invalid("must start and end with a letter or digit");
    }
    Ok(())
}
