//! List command - list recorded releases

use console::style;

use super::Session;
use crate::display::status_style;
use crate::error::Result;

/// Run the list command
pub async fn run(session: &Session) -> Result<()> {
    let ledger = session.ledger()?;
    let names = ledger.names().await?;

    if names.is_empty() {
        println!("No releases found in {}", session.store_dir.display());
        return Ok(());
    }

    // Print header
    println!(
        "{:<24} {:<10} {:<15} {:<30} {:<20}",
        style("NAME").bold(),
        style("REVISION").bold(),
        style("STATUS").bold(),
        style("CHART").bold(),
        style("UPDATED").bold()
    );

    for name in names {
        let Some(release) = ledger.latest(&name).await? else {
            continue;
        };

        println!(
            "{:<24} {:<10} {:<15} {:<30} {:<20}",
            release.name,
            release.revision,
            status_style(release.status),
            release.chart.to_string(),
            release.updated_at.format("%Y-%m-%d %H:%M:%S")
        );
    }

    Ok(())
}
