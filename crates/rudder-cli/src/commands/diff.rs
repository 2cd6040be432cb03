//! Diff command - manifest changes between two revisions

use console::style;
use rudder_kube::DiffEngine;

use super::Session;
use crate::display::DiffRenderer;
use crate::error::Result;

/// Run the diff command
pub async fn run(session: &Session, name: &str, from: u32, to: u32) -> Result<()> {
    let ledger = session.ledger()?;
    let old = ledger.get(name, from).await?;
    let new = ledger.get(name, to).await?;

    let engine = DiffEngine::new();
    let result = engine.diff_releases(&old, &new)?;

    println!(
        "{} {} revision {} -> {}: {}",
        style("→").blue().bold(),
        style(name).cyan(),
        from,
        to,
        engine.summary(&result)
    );
    println!();

    DiffRenderer::new().render(&result)?;
    Ok(())
}
