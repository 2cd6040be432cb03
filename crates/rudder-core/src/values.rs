//! Values handling with deep merge support and layered overlays

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

/// Values container with deep merge capability
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Values(pub JsonValue);

impl Values {
    /// Create empty values
    pub fn new() -> Self {
        Self(JsonValue::Object(serde_json::Map::new()))
    }

    /// Load values from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse values from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let value: JsonValue = serde_yaml::from_str(yaml)?;
        Ok(Self(value))
    }

    /// Parse values from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let value: JsonValue = serde_json::from_str(json)?;
        Ok(Self(value))
    }

    /// Deep merge another Values into this one
    ///
    /// Rules:
    /// - Scalars: overlay replaces base
    /// - Objects: recursive merge
    /// - Arrays: overlay replaces base (not appended)
    pub fn merge(&mut self, overlay: &Values) {
        deep_merge(&mut self.0, &overlay.0);
    }

    /// Merge multiple values in order
    pub fn merge_all(values: Vec<Values>) -> Self {
        let mut result = Values::new();
        for v in values {
            result.merge(&v);
        }
        result
    }

    /// Set a value by dotted path (e.g., "image.tag")
    pub fn set(&mut self, path: &str, value: JsonValue) {
        let parts: Vec<&str> = path.split('.').collect();
        set_nested(&mut self.0, &parts, value);
    }

    /// Get a value by dotted path
    pub fn get(&self, path: &str) -> Option<&JsonValue> {
        let parts: Vec<&str> = path.split('.').collect();
        get_nested(&self.0, &parts)
    }

    /// Get the inner JSON value
    pub fn inner(&self) -> &JsonValue {
        &self.0
    }

    /// Convert to JSON value
    pub fn into_inner(self) -> JsonValue {
        self.0
    }

    /// Check if values are empty
    pub fn is_empty(&self) -> bool {
        match &self.0 {
            JsonValue::Object(map) => map.is_empty(),
            JsonValue::Null => true,
            _ => false,
        }
    }

    /// Render the values as YAML
    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(&self.0)?)
    }
}

/// A layered configuration source applied on top of chart defaults
#[derive(Debug, Clone)]
pub enum Overlay {
    /// A YAML values file (`-f values.yaml`)
    File(PathBuf),

    /// Inline YAML text with a display name for error reporting
    Yaml { name: String, content: String },

    /// `key=value` assignments (`--set`)
    Set(Vec<String>),

    /// Values that were already parsed
    Values(Values),
}

impl Overlay {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::File(path.into())
    }

    pub fn yaml(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self::Yaml {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn set<I, S>(assignments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Set(assignments.into_iter().map(Into::into).collect())
    }

    /// Human-readable origin of this overlay
    pub fn source_name(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Yaml { name, .. } => name.clone(),
            Self::Set(_) => "--set".to_string(),
            Self::Values(_) => "<values>".to_string(),
        }
    }

    /// Parse this overlay into a value tree
    pub fn load(&self) -> Result<Values> {
        match self {
            Self::File(path) => {
                let content = std::fs::read_to_string(path)
                    .map_err(|e| CoreError::malformed(self.source_name(), e.to_string()))?;
                parse_mapping(&self.source_name(), &content)
            }
            Self::Yaml { name, content } => parse_mapping(name, content),
            Self::Set(assignments) => parse_set_values(assignments),
            Self::Values(values) => match &values.0 {
                JsonValue::Object(_) => Ok(values.clone()),
                JsonValue::Null => Ok(Values::new()),
                _ => Err(CoreError::malformed(
                    self.source_name(),
                    "values must be a mapping",
                )),
            },
        }
    }
}

/// Resolve the effective values for a release
///
/// Overlays apply left to right on top of `defaults`; a path present in a
/// later overlay replaces the same path from an earlier layer.
pub fn resolve(defaults: &Values, overlays: &[Overlay]) -> Result<Values> {
    let mut resolved = if defaults.0.is_null() {
        Values::new()
    } else {
        defaults.clone()
    };

    for overlay in overlays {
        let layer = overlay.load()?;
        resolved.merge(&layer);
    }

    Ok(resolved)
}

/// Parse a YAML document that must be a mapping (an empty document counts as `{}`)
fn parse_mapping(source_name: &str, content: &str) -> Result<Values> {
    let value: JsonValue = serde_yaml::from_str(content)
        .map_err(|e| CoreError::malformed(source_name, e.to_string()))?;

    match value {
        JsonValue::Object(_) => Ok(Values(value)),
        JsonValue::Null => Ok(Values::new()),
        other => Err(CoreError::malformed(
            source_name,
            format!("expected a mapping at the top level, found {}", json_type_name(&other)),
        )),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a sequence",
        JsonValue::Object(_) => "a mapping",
    }
}

/// Deep merge two JSON values
fn deep_merge(base: &mut JsonValue, overlay: &JsonValue) {
    match (base, overlay) {
        (JsonValue::Object(base_map), JsonValue::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// Set a nested value by path
fn set_nested(value: &mut JsonValue, path: &[&str], new_value: JsonValue) {
    let Some((key, remaining)) = path.split_first() else {
        *value = new_value;
        return;
    };

    if !value.is_object() {
        *value = JsonValue::Object(serde_json::Map::new());
    }

    if let JsonValue::Object(map) = value {
        if remaining.is_empty() {
            map.insert(key.to_string(), new_value);
        } else {
            let entry = map
                .entry(key.to_string())
                .or_insert_with(|| JsonValue::Object(serde_json::Map::new()));
            set_nested(entry, remaining, new_value);
        }
    }
}

/// Get a nested value by path
fn get_nested<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let Some((key, remaining)) = path.split_first() else {
        return Some(value);
    };

    match value {
        JsonValue::Object(map) => map.get(*key).and_then(|v| get_nested(v, remaining)),
        _ => None,
    }
}

/// Parse --set arguments (key=value format)
pub fn parse_set_values(set_args: &[String]) -> Result<Values> {
    let mut values = Values::new();

    for arg in set_args {
        let (key, val) = arg.split_once('=').ok_or_else(|| {
            CoreError::malformed(
                "--set",
                format!("invalid assignment '{}', expected key=value", arg),
            )
        })?;

        let key = key.trim();
        if key.is_empty() || key.split('.').any(str::is_empty) {
            return Err(CoreError::malformed(
                "--set",
                format!("invalid key path in '{}'", arg),
            ));
        }

        values.set(key, infer_scalar(val));
    }

    Ok(values)
}

/// Try to parse as JSON-ish scalar, fallback to string
fn infer_scalar(val: &str) -> JsonValue {
    if val == "true" {
        JsonValue::Bool(true)
    } else if val == "false" {
        JsonValue::Bool(false)
    } else if val == "null" {
        JsonValue::Null
    } else if let Ok(num) = val.parse::<i64>() {
        JsonValue::Number(num.into())
    } else if let Some(num) = val
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
    {
        JsonValue::Number(num)
    } else if val.starts_with('[') || val.starts_with('{') {
        serde_json::from_str(val).unwrap_or_else(|_| JsonValue::String(val.to_string()))
    } else {
        JsonValue::String(val.to_string())
    }
}
