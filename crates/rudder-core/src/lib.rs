//! Rudder Core - Data model for the release orchestrator
//!
//! This crate provides the foundational types used throughout Rudder:
//! - `Chart`: templates plus default values
//! - `Values`: Configuration values with deep merge support and overlays
//! - `Manifest`/`ManifestSet`: rendered resources keyed by (kind, name)
//! - `Release`: one revision of a named release
//! - `TemplateContext`: what templates can see

pub mod chart;
pub mod context;
pub mod error;
pub mod manifest;
pub mod release;
pub mod values;

pub use chart::{Chart, ChartMetadata, ChartRef, TemplateSource};
pub use context::{ChartInfo, TemplateContext};
pub use error::{CoreError, Result};
pub use manifest::{DEPENDS_ON_ANNOTATION, Manifest, ManifestSet, ResourceKey};
pub use release::{Operation, Release, ReleaseInfo, ReleaseStatus};
pub use values::{Overlay, Values, parse_set_values, resolve};
