//! History command - show release history

use console::style;
use rudder_kube::KubeError;

use super::Session;
use crate::display::status_style;
use crate::error::Result;
use crate::util::truncate;

/// Run the history command
pub async fn run(session: &Session, name: &str, max: Option<usize>, json: bool) -> Result<()> {
    let mut history = session.ledger()?.history(name).await?;
    if history.is_empty() {
        return Err(KubeError::ReleaseNotFound {
            name: name.to_string(),
        }
        .into());
    }

    // Keep the most recent revisions
    if let Some(max) = max {
        let skip = history.len().saturating_sub(max);
        history.drain(..skip);
    }

    if json {
        let json = serde_json::to_string_pretty(&history)?;
        println!("{}", json);
        return Ok(());
    }

    println!("Release history for {}:\n", style(name).cyan());

    // Print header
    println!(
        "{:<10} {:<15} {:<24} {:<20} {:<30}",
        style("REVISION").bold(),
        style("STATUS").bold(),
        style("CHART").bold(),
        style("UPDATED").bold(),
        style("DESCRIPTION").bold()
    );

    for release in history {
        let description = match (&release.failure_reason, &release.description) {
            (Some(reason), _) => reason.clone(),
            (None, Some(description)) => description.clone(),
            (None, None) => release.operation.to_string(),
        };

        println!(
            "{:<10} {:<15} {:<24} {:<20} {:<30}",
            release.revision,
            status_style(release.status),
            release.chart.to_string(),
            release.updated_at.format("%Y-%m-%d %H:%M:%S"),
            truncate(&description, 60)
        );
    }

    Ok(())
}
