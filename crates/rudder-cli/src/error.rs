//! CLI error types with exit code handling
//!
//! Every library error is folded into a [`CliError`] that knows its exit code.

use miette::Diagnostic;
use rudder_core::CoreError;
use rudder_engine::EngineError;
use rudder_kube::KubeError;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// An overlay could not be loaded or parsed
    #[error("Values error: {message}")]
    #[diagnostic(code(rudder::cli::values))]
    Values {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Template rendering failed; `message` holds the rendered diagnostic
    #[error("{message}")]
    #[diagnostic(code(rudder::cli::template))]
    Template { message: String },

    /// Chart structure or loading error
    #[error("Chart error: {message}")]
    #[diagnostic(code(rudder::cli::chart))]
    Chart {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Release missing, already installed, or locked
    #[error("{message}")]
    #[diagnostic(code(rudder::cli::release))]
    Release {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Cluster rejected or never answered an operation
    #[error("{message}")]
    #[diagnostic(code(rudder::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Invalid command line input
    #[error("{message}")]
    #[diagnostic(code(rudder::cli::usage))]
    Usage { message: String },

    #[error("Configuration error: {message}")]
    #[diagnostic(code(rudder::cli::config))]
    Config { message: String },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(rudder::cli::io))]
    Io { message: String },

    /// Wrapped error for passthrough (stores the formatted message)
    #[error("{message}")]
    #[diagnostic(code(rudder::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Values { .. } => exit_codes::VALUES_ERROR,
            CliError::Template { .. } => exit_codes::TEMPLATE_ERROR,
            CliError::Chart { .. } => exit_codes::CHART_ERROR,
            CliError::Release { .. } => exit_codes::RELEASE_ERROR,
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Config { .. } => exit_codes::CONFIG_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
        }
    }

    fn release(message: impl Into<String>, help: Option<&str>) -> Self {
        Self::Release {
            message: message.into(),
            help: help.map(str::to_string),
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Other {
            message: err.to_string(),
        }
    }
}

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ChartNotFound { .. } => CliError::Chart {
                message: err.to_string(),
                help: Some("pass the path of a directory containing Chart.yaml".to_string()),
            },
            CoreError::InvalidChart { .. } | CoreError::InvalidVersion(_) => CliError::Chart {
                message: err.to_string(),
                help: None,
            },
            CoreError::MalformedOverlay { .. }
            | CoreError::YamlParse(_)
            | CoreError::JsonParse(_) => CliError::Values {
                message: err.to_string(),
                help: None,
            },
            CoreError::Io(e) => e.into(),
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<EngineError> for CliError {
    fn from(err: EngineError) -> Self {
        CliError::Template {
            message: format!("{:?}", miette::Report::new(err)),
        }
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        match err {
            KubeError::MalformedOverlay { name, source } => CliError::Values {
                message: format!("release '{}': {}", name, source),
                help: Some("--set expects key=value and -f expects a YAML mapping".to_string()),
            },
            KubeError::Render { source, .. } => source.into(),
            KubeError::AlreadyExists { ref name } => CliError::release(
                format!("release '{}' already exists", name),
                Some("use `rudder upgrade` to change it"),
            ),
            KubeError::ReleaseNotFound { .. } => {
                CliError::release(err.to_string(), Some("`rudder install` creates a release"))
            }
            KubeError::NoSuchRevision { ref name, .. } => CliError::release(
                err.to_string(),
                Some(&format!("`rudder history {}` lists its revisions", name)),
            ),
            KubeError::NameLocked { .. } => {
                CliError::release(err.to_string(), Some("wait for the other operation to finish"))
            }
            KubeError::InvalidTransition { .. } => CliError::release(err.to_string(), None),
            KubeError::Reconcile { .. } => CliError::Cluster {
                message: err.to_string(),
                help: Some(
                    "the previous revision stays deployed; fix the cause and upgrade again"
                        .to_string(),
                ),
            },
            KubeError::Cluster(_) | KubeError::Api(_) => CliError::Cluster {
                message: err.to_string(),
                help: None,
            },
            KubeError::InvalidReleaseName { .. } => CliError::usage(err.to_string()),
            KubeError::InvalidConfig(message) => CliError::Config { message },
            KubeError::Core(core) => core.into(),
            KubeError::Io(e) => e.into(),
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<miette::Report> for CliError {
    fn from(err: miette::Report) -> Self {
        CliError::Other {
            message: format!("{:?}", err),
        }
    }
}

/// Result type for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;
