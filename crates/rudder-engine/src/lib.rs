//! Rudder Engine - chart rendering on top of MiniJinja
//!
//! This crate provides:
//! - the `TemplateEngine` seam and its MiniJinja implementation (`Engine`)
//! - Kubernetes-flavoured filters (toyaml, b64encode, nindent, ...)
//! - `Renderer`, which turns a chart plus values into a `ManifestSet`
//! - source-annotated `miette` diagnostics for template failures

pub mod engine;
pub mod error;
pub mod filters;
pub mod renderer;

pub use engine::{Engine, EngineBuilder, TemplateEngine};
pub use error::{EngineError, Result, TemplateError, TemplateErrorKind};
pub use filters::AVAILABLE_FILTERS;
pub use renderer::{Rendered, Renderer};
