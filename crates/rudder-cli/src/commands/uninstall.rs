//! Uninstall command - delete every resource of a release

use console::style;
use rudder_kube::UninstallOptions;

use super::{Session, interrupt_token};
use crate::display::{display_plan, display_result};
use crate::error::Result;

/// Run the uninstall command
pub async fn run(session: &Session, name: &str, dry_run: bool) -> Result<()> {
    println!(
        "{} Uninstalling release {}",
        style("→").blue().bold(),
        style(name).cyan()
    );

    let connected = session.connect().await?;
    connected.register(name).await?;

    let mut options = UninstallOptions::new().with_cancel(interrupt_token());
    if dry_run {
        options = options.dry_run();
    }

    let outcome = connected.orchestrator.uninstall(name, &options).await?;

    match &outcome.result {
        None => {
            println!(
                "{} Dry run - revision {} of {} would be uninstalled",
                style("✓").green().bold(),
                outcome.release.revision,
                style(name).cyan()
            );
            display_plan(&outcome.plan);
        }
        Some(result) => {
            display_result(result);
            println!(
                "{} Release {} uninstalled (revision {} kept in history)",
                style("✓").green().bold(),
                style(name).cyan(),
                outcome.release.revision
            );
        }
    }

    Ok(())
}
