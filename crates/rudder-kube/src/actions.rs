//! Options for install, upgrade, rollback and uninstall

use crate::reconcile::CancelToken;

/// Options for install
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Render and plan only; neither the ledger nor the cluster is touched
    pub dry_run: bool,

    /// Description recorded on the revision
    pub description: Option<String>,

    pub cancel: CancelToken,
}

impl InstallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Options for upgrade
#[derive(Debug, Clone, Default)]
pub struct UpgradeOptions {
    /// Install if no deployed release exists
    pub install: bool,

    /// Layer the overlays on the previous revision's values instead of the chart defaults
    pub reuse_values: bool,

    pub dry_run: bool,

    pub description: Option<String>,

    pub cancel: CancelToken,
}

impl UpgradeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable install-if-not-exists
    pub fn with_install(mut self) -> Self {
        self.install = true;
        self
    }

    pub fn with_reuse_values(mut self) -> Self {
        self.reuse_values = true;
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Options for the install an upgrade falls back to
    pub fn to_install(&self) -> InstallOptions {
        InstallOptions {
            dry_run: self.dry_run,
            description: self.description.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// Options for rollback
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    pub dry_run: bool,

    pub description: Option<String>,

    pub cancel: CancelToken,
}

impl RollbackOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Options for uninstall
#[derive(Debug, Clone, Default)]
pub struct UninstallOptions {
    pub dry_run: bool,

    pub cancel: CancelToken,
}

impl UninstallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }
}
