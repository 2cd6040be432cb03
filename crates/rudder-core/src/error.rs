//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Chart not found: {path}")]
    ChartNotFound { path: String },

    #[error("Invalid Chart.yaml: {message}")]
    InvalidChart { message: String },

    #[error("Malformed overlay '{source_name}': {message}")]
    MalformedOverlay { source_name: String, message: String },

    #[error("Invalid manifest: {message}")]
    InvalidManifest { message: String },

    #[error("Duplicate resource {key} in manifest set")]
    DuplicateResource { key: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid version: {0}")]
    InvalidVersion(#[from] semver::Error),
}

impl CoreError {
    pub(crate) fn malformed(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MalformedOverlay {
            source_name: source_name.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
