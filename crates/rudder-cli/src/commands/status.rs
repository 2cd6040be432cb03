//! Status command - show the latest revision of a release

use console::style;
use rudder_core::Release;
use rudder_kube::{DiffEngine, DiffResult, KubeError};

use super::Session;
use crate::display::{DiffRenderer, display_notes, pluralize, status_style};
use crate::error::Result;

/// Run the status command
pub async fn run(
    session: &Session,
    name: &str,
    check_drift: bool,
    show_values: bool,
    json: bool,
) -> Result<()> {
    let (release, drift) = if check_drift {
        let connected = session.connect().await?;
        connected.register(name).await?;
        let report = connected.orchestrator.status(name, true).await?;
        (report.release, report.drift)
    } else {
        let release = session
            .ledger()?
            .latest(name)
            .await?
            .ok_or_else(|| KubeError::ReleaseNotFound {
                name: name.to_string(),
            })?;
        (release, None)
    };

    if json {
        let json = serde_json::to_string_pretty(&serde_json::json!({
            "release": release,
            "drift": drift,
        }))?;
        println!("{}", json);
        return Ok(());
    }

    print_release(&release);

    // Show values if requested
    if show_values {
        println!("\n{}", style("VALUES").bold().underlined());
        println!("{}", release.values.to_yaml()?.trim_end());
    }

    println!("\n{}", style("RESOURCES").bold().underlined());
    for key in release.manifests.keys() {
        println!("  {}", key);
    }

    if let Some(drift) = &drift {
        print_drift(drift)?;
    }

    display_notes(&release);
    Ok(())
}

fn print_release(release: &Release) {
    println!("{}", style("RELEASE INFO").bold().underlined());
    println!("  Name:       {}", style(&release.name).cyan());
    println!("  Revision:   {}", style(release.revision).yellow());
    println!("  Status:     {}", status_style(release.status));
    println!("  Operation:  {}", release.operation);
    println!("  Chart:      {}", release.chart);
    if let Some(description) = &release.description {
        println!("  Description: {}", description);
    }
    if let Some(reason) = &release.failure_reason {
        println!("  Failure:    {}", style(reason).red());
    }
    println!(
        "  Created:    {}",
        release.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "  Updated:    {}",
        release.updated_at.format("%Y-%m-%d %H:%M:%S")
    );
}

fn print_drift(drift: &DiffResult) -> Result<()> {
    println!("\n{}", style("DRIFT").bold().underlined());
    if !drift.has_drift {
        println!("  {} Cluster matches revision {}", style("✓").green(), drift.old_revision);
        return Ok(());
    }

    println!(
        "  {} {} differ from revision {}: {}",
        style("⚠").yellow(),
        pluralize(drift.changes.len(), "resource", "resources"),
        drift.old_revision,
        DiffEngine::new().summary(drift)
    );
    DiffRenderer::new().render(drift)?;
    Ok(())
}
