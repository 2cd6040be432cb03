//! Chart definition and loading

use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::values::Values;

/// File name of the chart metadata
pub const CHART_FILE: &str = "Chart.yaml";

/// File name of the chart default values
pub const VALUES_FILE: &str = "values.yaml";

/// Template file rendered into release notes instead of manifests
pub const NOTES_FILE: &str = "NOTES.txt";

/// Chart metadata, as found in `Chart.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartMetadata {
    /// Chart name (required)
    pub name: String,

    /// Chart version (required, SemVer)
    #[serde(with = "version_serde")]
    pub version: Version,

    /// Description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Application version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,
}

/// Identifier of a chart at a given version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartRef {
    pub name: String,
    #[serde(with = "version_serde")]
    pub version: Version,
}

impl std::fmt::Display for ChartRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

/// A single template file of a chart
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSource {
    /// Path relative to `templates/`, with `/` separators
    pub id: String,

    /// Raw template text
    pub source: String,
}

impl TemplateSource {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }

    /// Helpers (`_helpers.tpl`, `_labels.yaml`...) are only used through include/import
    pub fn is_helper(&self) -> bool {
        self.file_name().starts_with('_')
    }

    /// `NOTES.txt` renders into the release notes
    pub fn is_notes(&self) -> bool {
        self.file_name() == NOTES_FILE
    }

    fn file_name(&self) -> &str {
        self.id.rsplit('/').next().unwrap_or(&self.id)
    }
}

/// A loaded chart: metadata, templates in path order and default values
#[derive(Debug, Clone)]
pub struct Chart {
    pub metadata: ChartMetadata,
    pub templates: Vec<TemplateSource>,
    pub defaults: Values,

    /// Directory the chart was loaded from, when it came from disk
    pub root: Option<PathBuf>,
}

impl Chart {
    /// Build a chart in memory
    pub fn new(metadata: ChartMetadata, templates: Vec<TemplateSource>, defaults: Values) -> Self {
        let mut templates = templates;
        templates.sort_by(|a, b| a.id.cmp(&b.id));
        Self {
            metadata,
            templates,
            defaults,
            root: None,
        }
    }

    /// Load a chart from a directory
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let root = path.as_ref().to_path_buf();

        if !root.is_dir() {
            return Err(CoreError::ChartNotFound {
                path: root.display().to_string(),
            });
        }

        let chart_file = root.join(CHART_FILE);
        if !chart_file.exists() {
            return Err(CoreError::InvalidChart {
                message: format!("{} not found in {}", CHART_FILE, root.display()),
            });
        }

        let content = std::fs::read_to_string(&chart_file)?;
        let metadata: ChartMetadata =
            serde_yaml::from_str(&content).map_err(|e| CoreError::InvalidChart {
                message: e.to_string(),
            })?;

        if metadata.name.trim().is_empty() {
            return Err(CoreError::InvalidChart {
                message: "chart name must not be empty".to_string(),
            });
        }

        let values_path = root.join(VALUES_FILE);
        let defaults = if values_path.exists() {
            let values = Values::from_file(&values_path)?;
            if values.inner().is_null() {
                Values::new()
            } else if values.inner().is_object() {
                values
            } else {
                return Err(CoreError::InvalidChart {
                    message: format!("{} must contain a mapping", VALUES_FILE),
                });
            }
        } else {
            Values::new()
        };

        let templates = load_templates(&root.join("templates"))?;

        Ok(Self {
            metadata,
            templates,
            defaults,
            root: Some(root),
        })
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    pub fn chart_ref(&self) -> ChartRef {
        ChartRef {
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
        }
    }

    /// Templates that produce output (manifests or notes)
    pub fn renderable(&self) -> impl Iterator<Item = &TemplateSource> {
        self.templates.iter().filter(|t| !t.is_helper())
    }

    pub fn template(&self, id: &str) -> Option<&TemplateSource> {
        self.templates.iter().find(|t| t.id == id)
    }
}

/// Read every template file under `dir`, ordered by relative path
fn load_templates(dir: &Path) -> Result<Vec<TemplateSource>> {
    let mut templates = Vec::new();

    if !dir.exists() {
        return Ok(templates);
    }

    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(ext) = path.extension() else {
            continue;
        };
        let ext = ext.to_string_lossy().to_lowercase();
        if !matches!(ext.as_str(), "yaml" | "yml" | "tpl" | "j2" | "txt" | "json") {
            continue;
        }

        let id = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let source = std::fs::read_to_string(path)?;
        templates.push(TemplateSource { id, source });
    }

    templates.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(templates)
}

/// Custom serde for semver::Version
mod version_serde {
    use semver::Version;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(version: &Version, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&version.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Version, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}
