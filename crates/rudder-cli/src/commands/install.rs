//! Install command - deploy a chart as a new release

use console::style;
use rudder_core::{Chart, Overlay};
use rudder_kube::{InstallOptions, ReleaseOutcome};
use std::path::Path;

use super::{Session, interrupt_token};
use crate::display::{display_notes, display_plan, display_result};
use crate::error::Result;

/// Run the install command
pub async fn run(
    session: &Session,
    name: &str,
    chart_path: &Path,
    overlays: &[Overlay],
    dry_run: bool,
    description: Option<String>,
) -> Result<()> {
    let chart = Chart::load(chart_path)?;
    println!(
        "{} Installing chart {} version {}",
        style("→").blue().bold(),
        style(chart.name()).cyan(),
        style(&chart.metadata.version).yellow()
    );

    let connected = session.connect().await?;

    let mut options = InstallOptions::new().with_cancel(interrupt_token());
    if dry_run {
        options = options.dry_run();
    }
    if let Some(description) = description {
        options = options.with_description(description);
    }

    let outcome = connected
        .orchestrator
        .install(name, &chart, overlays, &options)
        .await?;

    report(&outcome, "installed", session.namespace());
    Ok(())
}

/// Shared success report for install, upgrade and rollback
pub(crate) fn report(outcome: &ReleaseOutcome, verb: &str, namespace: &str) {
    let release = &outcome.release;

    match &outcome.result {
        None => {
            println!(
                "{} Dry run - revision {} of {} would be {} in namespace {}",
                style("✓").green().bold(),
                release.revision,
                style(&release.name).cyan(),
                verb,
                style(namespace).yellow()
            );
            display_plan(&outcome.plan);
        }
        Some(result) => {
            display_result(result);
            println!(
                "{} Successfully {} {} (revision {}) in namespace {}",
                style("✓").green().bold(),
                verb,
                style(&release.name).cyan(),
                style(release.revision).yellow(),
                style(namespace).yellow()
            );
        }
    }

    display_notes(release);
}
