//! Template rendering context

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::chart::ChartMetadata;
use crate::release::ReleaseInfo;
use crate::values::Values;

/// Context available to all templates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// Resolved values
    pub values: JsonValue,

    /// Release information
    pub release: ReleaseInfo,

    /// Chart metadata
    pub chart: ChartInfo,
}

/// Chart information for templates
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartInfo {
    pub name: String,
    pub version: String,
    pub app_version: Option<String>,
}

impl From<&ChartMetadata> for ChartInfo {
    fn from(meta: &ChartMetadata) -> Self {
        Self {
            name: meta.name.clone(),
            version: meta.version.to_string(),
            app_version: meta.app_version.clone(),
        }
    }
}

impl TemplateContext {
    pub fn new(values: &Values, release: ReleaseInfo, chart: &ChartMetadata) -> Self {
        let values = match values.inner() {
            JsonValue::Null => JsonValue::Object(Default::default()),
            other => other.clone(),
        };
        Self {
            values,
            release,
            chart: ChartInfo::from(chart),
        }
    }

    /// Convert to minijinja-compatible context
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}
