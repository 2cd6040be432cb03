//! Diff engine for comparing releases and detecting cluster drift
//!
//! - Compare the manifest sets of two revisions
//! - Detect drift: live objects that were deleted or changed out of band
//! - Line diffs of the YAML of each changed resource

use rudder_core::{ManifestSet, Release, ResourceKey};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use similar::{ChangeTag, TextDiff};

use crate::cluster::ClusterApi;
use crate::error::Result;

/// Diff engine for release comparison
pub struct DiffEngine {
    /// Unchanged lines kept around each change
    pub context_lines: usize,
}

impl DiffEngine {
    pub fn new() -> Self {
        Self { context_lines: 3 }
    }

    pub fn with_context(mut self, lines: usize) -> Self {
        self.context_lines = lines;
        self
    }

    /// Resources added, modified or removed between two manifest sets
    ///
    /// Additions and modifications follow `new` order, removals `old` order.
    pub fn diff_sets(&self, old: &ManifestSet, new: &ManifestSet) -> Result<Vec<ResourceChange>> {
        let mut changes = Vec::new();

        for manifest in new {
            let key = manifest.key();
            match old.get(&key) {
                Some(previous) if previous.body != manifest.body => {
                    changes.push(ResourceChange {
                        resource: key,
                        change_type: ChangeType::Modified,
                        diff: Some(self.compute_text_diff(&previous.to_yaml()?, &manifest.to_yaml()?)),
                        is_drift: false,
                    });
                }
                Some(_) => {}
                None => changes.push(ResourceChange {
                    resource: key,
                    change_type: ChangeType::Added,
                    diff: Some(DiffContent::new_addition(&manifest.to_yaml()?)),
                    is_drift: false,
                }),
            }
        }

        for manifest in old {
            let key = manifest.key();
            if !new.contains(&key) {
                changes.push(ResourceChange {
                    resource: key,
                    change_type: ChangeType::Removed,
                    diff: Some(DiffContent::new_removal(&manifest.to_yaml()?)),
                    is_drift: false,
                });
            }
        }

        Ok(changes)
    }

    /// Compare two revisions of a release
    pub fn diff_releases(&self, old: &Release, new: &Release) -> Result<DiffResult> {
        Ok(DiffResult {
            old_revision: old.revision,
            new_revision: new.revision,
            changes: self.diff_sets(&old.manifests, &new.manifests)?,
            has_drift: false,
        })
    }

    /// Compare the recorded manifests of a release with the live objects
    ///
    /// Only fields present in the recorded manifest are compared, so
    /// server-populated fields (status, uid, managedFields...) never count
    /// as drift.
    pub async fn detect_drift(&self, release: &Release, cluster: &dyn ClusterApi) -> Result<DiffResult> {
        let mut changes = Vec::new();

        for manifest in &release.manifests {
            let key = manifest.key();
            match cluster.get_resource(&key).await? {
                None => changes.push(ResourceChange {
                    resource: key,
                    change_type: ChangeType::Removed,
                    diff: Some(DiffContent::new_removal(&manifest.to_yaml()?)),
                    is_drift: true,
                }),
                Some(live) => {
                    let projected = project(&live.body, &manifest.body);
                    if projected != manifest.body {
                        let live_yaml = serde_yaml::to_string(&projected)?;
                        changes.push(ResourceChange {
                            resource: key,
                            change_type: ChangeType::Modified,
                            diff: Some(self.compute_text_diff(&manifest.to_yaml()?, &live_yaml)),
                            is_drift: true,
                        });
                    }
                }
            }
        }

        Ok(DiffResult {
            old_revision: release.revision,
            new_revision: release.revision,
            has_drift: !changes.is_empty(),
            changes,
        })
    }

    fn compute_text_diff(&self, old: &str, new: &str) -> DiffContent {
        let diff = TextDiff::from_lines(old, new);
        let mut lines = Vec::new();

        for group in diff.grouped_ops(self.context_lines) {
            for op in group {
                for change in diff.iter_changes(&op) {
                    let line_type = match change.tag() {
                        ChangeTag::Delete => LineType::Removed,
                        ChangeTag::Insert => LineType::Added,
                        ChangeTag::Equal => LineType::Context,
                    };

                    lines.push(DiffLine {
                        line_type,
                        content: change.value().trim_end().to_string(),
                        old_line_no: change.old_index(),
                        new_line_no: change.new_index(),
                    });
                }
            }
        }

        DiffContent { lines }
    }

    /// Human-readable summary
    pub fn summary(&self, result: &DiffResult) -> String {
        let mut parts = Vec::new();

        for change_type in [ChangeType::Added, ChangeType::Modified, ChangeType::Removed] {
            let count = result.changes_by_type(change_type).len();
            if count > 0 {
                parts.push(format!("{} {}", count, change_type));
            }
        }

        let drift = result.drift_changes().len();
        if drift > 0 {
            parts.push(format!("{} drifted", drift));
        }

        if parts.is_empty() {
            "No changes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl Default for DiffEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep only the parts of `live` that `recorded` specifies
fn project(live: &JsonValue, recorded: &JsonValue) -> JsonValue {
    match (live, recorded) {
        (JsonValue::Object(live), JsonValue::Object(recorded)) => JsonValue::Object(
            recorded
                .iter()
                .filter_map(|(k, want)| live.get(k).map(|have| (k.clone(), project(have, want))))
                .collect(),
        ),
        (JsonValue::Array(live), JsonValue::Array(recorded)) if live.len() == recorded.len() => {
            JsonValue::Array(
                live.iter()
                    .zip(recorded)
                    .map(|(have, want)| project(have, want))
                    .collect(),
            )
        }
        _ => live.clone(),
    }
}

/// Result of comparing releases or detecting drift
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffResult {
    /// Old revision (the recorded one for drift detection)
    pub old_revision: u32,

    pub new_revision: u32,

    pub changes: Vec<ResourceChange>,

    /// Whether any change is drift (out-of-band cluster modification)
    pub has_drift: bool,
}

impl DiffResult {
    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    pub fn changes_by_type(&self, change_type: ChangeType) -> Vec<&ResourceChange> {
        self.changes
            .iter()
            .filter(|c| c.change_type == change_type)
            .collect()
    }

    pub fn drift_changes(&self) -> Vec<&ResourceChange> {
        self.changes.iter().filter(|c| c.is_drift).collect()
    }
}

/// A change to a single resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceChange {
    pub resource: ResourceKey,

    pub change_type: ChangeType,

    /// Line diff of the YAML, when available
    pub diff: Option<DiffContent>,

    /// Whether this change is drift
    pub is_drift: bool,
}

impl ResourceChange {
    pub fn display_name(&self) -> String {
        self.resource.to_string()
    }
}

/// Type of resource change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Added,
    Modified,
    Removed,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Added => write!(f, "added"),
            ChangeType::Modified => write!(f, "modified"),
            ChangeType::Removed => write!(f, "removed"),
        }
    }
}

/// Detailed diff content
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffContent {
    pub lines: Vec<DiffLine>,
}

impl DiffContent {
    fn new_addition(content: &str) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| DiffLine {
                line_type: LineType::Added,
                content: line.to_string(),
                old_line_no: None,
                new_line_no: Some(i),
            })
            .collect();

        Self { lines }
    }

    fn new_removal(content: &str) -> Self {
        let lines = content
            .lines()
            .enumerate()
            .map(|(i, line)| DiffLine {
                line_type: LineType::Removed,
                content: line.to_string(),
                old_line_no: Some(i),
                new_line_no: None,
            })
            .collect();

        Self { lines }
    }

    /// Unified diff text (without hunk headers)
    pub fn to_unified_diff(&self) -> String {
        let mut output = String::new();

        for line in &self.lines {
            let prefix = match line.line_type {
                LineType::Added => "+",
                LineType::Removed => "-",
                LineType::Context => " ",
            };
            output.push_str(prefix);
            output.push_str(&line.content);
            output.push('\n');
        }

        output
    }
}

/// A single line in a diff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiffLine {
    pub line_type: LineType,
    pub content: String,
    pub old_line_no: Option<usize>,
    pub new_line_no: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LineType {
    Added,
    Removed,
    Context,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::FakeCluster;
    use rudder_core::{ChartRef, Operation, Values};

    fn set(yaml: &str) -> ManifestSet {
        ManifestSet::from_yaml(yaml).unwrap()
    }

    fn release(revision: u32, yaml: &str) -> Release {
        let mut release = Release::pending(
            "web",
            ChartRef {
                name: "web".to_string(),
                version: semver::Version::new(0, 1, 0),
            },
            Values::new(),
            set(yaml),
            Operation::Install,
        );
        release.revision = revision;
        release
    }

    const V1: &str = "kind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  level: info\n---\nkind: Secret\nmetadata:\n  name: old\n";
    const V2: &str = "kind: ConfigMap\nmetadata:\n  name: cfg\ndata:\n  level: debug\n---\nkind: Service\nmetadata:\n  name: web\n";

    #[test]
    fn test_diff_releases() {
        let engine = DiffEngine::new();
        let result = engine.diff_releases(&release(1, V1), &release(2, V2)).unwrap();

        let changes: Vec<(String, ChangeType)> = result
            .changes
            .iter()
            .map(|c| (c.display_name(), c.change_type))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("ConfigMap/cfg".to_string(), ChangeType::Modified),
                ("Service/web".to_string(), ChangeType::Added),
                ("Secret/old".to_string(), ChangeType::Removed),
            ]
        );
        assert_eq!(engine.summary(&result), "1 added, 1 modified, 1 removed");

        let unified = result.changes[0].diff.as_ref().unwrap().to_unified_diff();
        assert!(unified.contains("-  level: info"));
        assert!(unified.contains("+  level: debug"));
    }

    #[test]
    fn test_identical_sets_have_no_changes() {
        let engine = DiffEngine::new();
        let result = engine.diff_releases(&release(1, V1), &release(2, V1)).unwrap();
        assert!(!result.has_changes());
        assert_eq!(engine.summary(&result), "No changes");
    }

    #[tokio::test]
    async fn test_drift_ignores_server_fields() {
        let cluster = FakeCluster::new();
        let recorded = release(1, V1);

        for manifest in &recorded.manifests {
            let mut live = manifest.clone();
            live.body["metadata"]["uid"] = serde_json::json!("1234");
            live.body["status"] = serde_json::json!({"ready": true});
            cluster.put_out_of_band(live);
        }

        let result = DiffEngine::new().detect_drift(&recorded, &cluster).await.unwrap();
        assert!(!result.has_drift);
    }

    #[tokio::test]
    async fn test_drift_flags_missing_and_changed() {
        let cluster = FakeCluster::new();
        let recorded = release(1, V1);

        let mut changed = recorded.manifests.get(&ResourceKey::new("ConfigMap", "cfg")).unwrap().clone();
        changed.body["data"]["level"] = serde_json::json!("trace");
        cluster.put_out_of_band(changed);

        let result = DiffEngine::new().detect_drift(&recorded, &cluster).await.unwrap();
        assert!(result.has_drift);

        let changes: Vec<(String, ChangeType)> = result
            .drift_changes()
            .iter()
            .map(|c| (c.display_name(), c.change_type))
            .collect();
        assert_eq!(
            changes,
            vec![
                ("ConfigMap/cfg".to_string(), ChangeType::Modified),
                ("Secret/old".to_string(), ChangeType::Removed),
            ]
        );
    }
}
