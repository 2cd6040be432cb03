//! Rollback command - re-deploy an earlier revision

use console::style;
use rudder_kube::RollbackOptions;

use super::install::report;
use super::{Session, interrupt_token};
use crate::error::Result;

/// Run the rollback command
pub async fn run(
    session: &Session,
    name: &str,
    revision: Option<u32>,
    dry_run: bool,
    description: Option<String>,
) -> Result<()> {
    let target = match revision {
        Some(revision) => format!("revision {}", revision),
        None => "previous revision".to_string(),
    };

    println!(
        "{} Rolling back release {} to {}",
        style("→").blue().bold(),
        style(name).cyan(),
        style(&target).yellow()
    );

    let connected = session.connect().await?;
    connected.register(name).await?;

    let mut options = RollbackOptions::new().with_cancel(interrupt_token());
    if dry_run {
        options = options.dry_run();
    }
    if let Some(description) = description {
        options = options.with_description(description);
    }

    let outcome = connected
        .orchestrator
        .rollback(name, revision, &options)
        .await?;

    report(&outcome, "rolled back", session.namespace());
    Ok(())
}
