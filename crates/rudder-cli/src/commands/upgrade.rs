//! Upgrade command - move a release to a new chart or values

use console::style;
use rudder_core::{Chart, Overlay};
use rudder_kube::UpgradeOptions;
use std::path::Path;

use super::install::report;
use super::{Session, interrupt_token};
use crate::error::Result;

/// Boolean switches of the upgrade command
#[derive(Debug, Clone, Copy, Default)]
pub struct Flags {
    pub install: bool,
    pub reuse_values: bool,
    pub dry_run: bool,
}

/// Run the upgrade command
pub async fn run(
    session: &Session,
    name: &str,
    chart_path: &Path,
    overlays: &[Overlay],
    flags: Flags,
    description: Option<String>,
) -> Result<()> {
    let chart = Chart::load(chart_path)?;
    println!(
        "{} Upgrading release {} to chart {} version {}",
        style("→").blue().bold(),
        style(name).cyan(),
        style(chart.name()).cyan(),
        style(&chart.metadata.version).yellow()
    );

    let connected = session.connect().await?;
    connected.register(name).await?;

    let mut options = UpgradeOptions::new().with_cancel(interrupt_token());
    if flags.install {
        options = options.with_install();
    }
    if flags.reuse_values {
        options = options.with_reuse_values();
    }
    if flags.dry_run {
        options = options.dry_run();
    }
    if let Some(description) = description {
        options = options.with_description(description);
    }

    let outcome = connected
        .orchestrator
        .upgrade(name, &chart, overlays, &options)
        .await?;

    report(&outcome, "upgraded", session.namespace());
    Ok(())
}
