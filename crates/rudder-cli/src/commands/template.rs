//! Template command - render chart templates locally

use console::style;
use rudder_core::{Chart, Overlay, resolve};
use rudder_kube::validate_release_name;
use tracing::debug;
use std::path::Path;

use super::Session;
use crate::error::{CliError, Result};

pub fn run(
    session: &Session,
    name: &str,
    chart_path: &Path,
    overlays: &[Overlay],
    show_only: Option<&str>,
    show_values: bool,
) -> Result<()> {
    validate_release_name(name).map_err(|e| CliError::usage(e.to_string()))?;

    let chart = Chart::load(chart_path)?;
    debug!(chart = %chart.chart_ref(), templates = chart.templates.len(), "loaded chart");

    let values = resolve(&chart.defaults, overlays)?;

    // Show resolved values if requested
    if show_values {
        println!("{}", style("# Computed Values").cyan().bold());
        println!("---");
        println!("{}", values.to_yaml()?.trim_end());
        println!("---");
        println!();
    }

    let rendered = session.renderer().render_release(&chart, &values, name)?;

    let mut first = true;
    for manifest in &rendered.manifests {
        let key = manifest.key().to_string();
        if let Some(filter) = show_only {
            if !key.contains(filter) {
                continue;
            }
        }

        if !first {
            println!();
        }
        first = false;

        println!("---");
        println!("{}", style(format!("# Source: {}", key)).dim());
        println!("{}", manifest.to_yaml()?.trim_end());
    }

    // Show notes
    if let Some(notes) = &rendered.notes {
        if show_only.is_none() {
            if !first {
                println!();
            }
            println!("{}", style("# NOTES:").yellow().bold());
            println!("{}", notes);
        }
    }

    Ok(())
}
