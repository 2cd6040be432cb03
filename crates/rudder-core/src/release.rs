//! Release management types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chart::ChartRef;
use crate::manifest::ManifestSet;
use crate::values::Values;

/// One revision of a named release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Release name
    pub name: String,

    /// Revision number, starting at 1
    pub revision: u32,

    /// Chart the release was rendered from
    pub chart: ChartRef,

    /// Resolved values used for this revision
    pub values: Values,

    /// Rendered manifests
    pub manifests: ManifestSet,

    /// Rendered release notes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Current status
    pub status: ReleaseStatus,

    /// Operation that produced this revision
    pub operation: Operation,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Why the revision failed, when it did
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl Release {
    /// A new pending release. The revision is assigned by the ledger.
    pub fn pending(
        name: impl Into<String>,
        chart: ChartRef,
        values: Values,
        manifests: ManifestSet,
        operation: Operation,
    ) -> Self {
        let now = Utc::now();
        Self {
            name: name.into(),
            revision: 0,
            chart,
            values,
            manifests,
            notes: None,
            status: ReleaseStatus::Pending,
            operation,
            description: None,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_notes(mut self, notes: Option<String>) -> Self {
        self.notes = notes;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    /// A new pending release carrying the content of `self`
    pub fn copy_for(&self, operation: Operation) -> Self {
        Self::pending(
            self.name.clone(),
            self.chart.clone(),
            self.values.clone(),
            self.manifests.clone(),
            operation,
        )
        .with_notes(self.notes.clone())
    }

    pub fn is_deployed(&self) -> bool {
        self.status == ReleaseStatus::Deployed
    }

    /// Apply a status change and stamp `updated_at`; `reason` replaces any recorded failure
    pub fn set_status(&mut self, status: ReleaseStatus, reason: Option<String>) {
        self.status = status;
        self.failure_reason = reason;
        self.updated_at = Utc::now();
    }

    /// Note a failed operation without changing the status
    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }
}

/// Release status
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseStatus {
    #[default]
    Pending,
    Deployed,
    Failed,
    Superseded,
    Uninstalled,
}

impl ReleaseStatus {
    /// Whether the ledger accepts moving from `self` to `next`
    pub fn can_transition_to(self, next: ReleaseStatus) -> bool {
        use ReleaseStatus::*;
        matches!(
            (self, next),
            (Pending, Deployed)
                | (Pending, Failed)
                | (Deployed, Superseded)
                | (Deployed, Uninstalled)
                | (Deployed, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Superseded | Self::Uninstalled)
    }
}

impl std::fmt::Display for ReleaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Superseded => "superseded",
            Self::Uninstalled => "uninstalled",
        };
        write!(f, "{}", s)
    }
}

/// Lifecycle operation that created a revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    Install,
    Upgrade,
    Rollback { target: u32 },
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Install => write!(f, "install"),
            Self::Upgrade => write!(f, "upgrade"),
            Self::Rollback { target } => write!(f, "rollback to {}", target),
        }
    }
}

/// Release information for templates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseInfo {
    /// Release name
    pub name: String,

    /// Target namespace
    pub namespace: String,

    /// Service (always "Rudder")
    pub service: String,
}

impl ReleaseInfo {
    pub fn new(name: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            namespace: namespace.to_string(),
            service: "Rudder".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn release() -> Release {
        Release::pending(
            "web",
            ChartRef {
                name: "web".into(),
                version: Version::new(0, 1, 0),
            },
            Values::from_yaml("replicaCount: 1").unwrap(),
            ManifestSet::from_yaml("kind: ConfigMap\nmetadata:\n  name: cfg\n").unwrap(),
            Operation::Install,
        )
    }

    #[test]
    fn test_transitions() {
        use ReleaseStatus::*;
        assert!(Pending.can_transition_to(Deployed));
        assert!(Pending.can_transition_to(Failed));
        assert!(Deployed.can_transition_to(Superseded));
        assert!(Deployed.can_transition_to(Uninstalled));
        assert!(!Superseded.can_transition_to(Deployed));
        assert!(!Failed.can_transition_to(Deployed));
        assert!(!Pending.can_transition_to(Superseded));
        assert!(!Uninstalled.can_transition_to(Deployed));
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ReleaseStatus::Uninstalled).unwrap();
        assert_eq!(json, "\"uninstalled\"");
        assert_eq!(ReleaseStatus::Superseded.to_string(), "superseded");
    }

    #[test]
    fn test_release_json_round_trip() {
        let mut rel = release();
        rel.revision = 3;
        rel.operation = Operation::Rollback { target: 1 };
        rel.set_status(ReleaseStatus::Failed, Some("boom".into()));

        let json = serde_json::to_string(&rel).unwrap();
        let back: Release = serde_json::from_str(&json).unwrap();

        assert_eq!(back, rel);
        assert_eq!(back.failure_reason.as_deref(), Some("boom"));
    }

    #[test]
    fn test_failure_note_keeps_status() {
        let mut rel = release();
        rel.set_status(ReleaseStatus::Deployed, None);

        rel.record_failure("delete ConfigMap/cfg failed");
        assert_eq!(rel.status, ReleaseStatus::Deployed);
        assert_eq!(rel.failure_reason.as_deref(), Some("delete ConfigMap/cfg failed"));

        rel.set_status(ReleaseStatus::Uninstalled, None);
        assert!(rel.failure_reason.is_none());
    }

    #[test]
    fn test_copy_for_resets_status() {
        let mut rel = release();
        rel.revision = 2;
        rel.set_status(ReleaseStatus::Deployed, None);

        let copy = rel.copy_for(Operation::Rollback { target: 2 });
        assert_eq!(copy.status, ReleaseStatus::Pending);
        assert_eq!(copy.revision, 0);
        assert_eq!(copy.manifests, rel.manifests);
        assert_eq!(copy.values, rel.values);
    }
}
