//! Display formatting for CLI output
//!
//! Provides structured display for:
//! - Planned and applied operations
//! - Revision diffs and drift with colored unified diffs
//! - Release status lines

use console::{Style, StyledObject, style};
use rudder_core::{Release, ReleaseStatus};
use rudder_kube::{ChangeType, DiffResult, OperationKind, Plan, ReconcileResult, ResourceChange};
use rudder_kube::diff::LineType;
use std::io::{self, Write};

use crate::util::format_elapsed;

/// Format count with proper pluralization
pub fn pluralize(count: usize, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("{} {}", count, singular)
    } else {
        format!("{} {}", count, plural)
    }
}

/// Color a release status
pub fn status_style(status: ReleaseStatus) -> StyledObject<String> {
    let text = status.to_string();
    match status {
        ReleaseStatus::Deployed => style(text).green(),
        ReleaseStatus::Failed => style(text).red(),
        ReleaseStatus::Pending => style(text).yellow(),
        ReleaseStatus::Superseded | ReleaseStatus::Uninstalled => style(text).dim(),
    }
}

fn op_marker(kind: OperationKind) -> (&'static str, Style) {
    match kind {
        OperationKind::Create => ("+", Style::new().green()),
        OperationKind::Update => ("~", Style::new().yellow()),
        OperationKind::Delete => ("-", Style::new().red()),
    }
}

/// One-line summary of a plan: "2 to create, 1 to update, 0 to delete"
pub fn plan_summary(plan: &Plan) -> String {
    format!(
        "{} to create, {} to update, {} to delete",
        plan.count(OperationKind::Create),
        plan.count(OperationKind::Update),
        plan.count(OperationKind::Delete)
    )
}

/// Print the operations of a plan, one per line
pub fn display_plan(plan: &Plan) {
    if plan.is_empty() {
        println!("  {} No changes", style("✓").green());
        return;
    }
    for op in &plan.ops {
        let (marker, color) = op_marker(op.kind);
        println!("  {} {}", color.apply_to(marker), op.key);
    }
    println!("  {}", style(plan_summary(plan)).dim());
}

/// Print what a reconciliation actually did
pub fn display_result(result: &ReconcileResult) {
    for outcome in &result.operations {
        let (marker, color) = op_marker(outcome.op);
        let retries = if outcome.attempts > 1 {
            format!(" after {}", pluralize(outcome.attempts as usize, "attempt", "attempts"))
        } else {
            String::new()
        };
        println!(
            "  {} {} {}{}",
            color.apply_to(marker),
            outcome.resource,
            style(format_elapsed(outcome.elapsed)).dim(),
            retries
        );
    }
    if !result.unchanged.is_empty() {
        println!(
            "  {} {} unchanged",
            style("=").dim(),
            pluralize(result.unchanged.len(), "resource", "resources")
        );
    }
}

/// Print release notes when present
pub fn display_notes(release: &Release) {
    if let Some(notes) = &release.notes {
        println!("\n{}", style("NOTES:").bold());
        println!("{}", notes);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Diff Display
// ═══════════════════════════════════════════════════════════════════════════

/// Renderer for revision diffs and drift reports
pub struct DiffRenderer {
    writer: Box<dyn Write>,
    colored: bool,
}

impl Default for DiffRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl DiffRenderer {
    /// Create a new renderer that writes to stdout
    pub fn new() -> Self {
        Self {
            writer: Box::new(io::stdout()),
            colored: true,
        }
    }

    /// Create a plain renderer that writes to a custom writer (for testing)
    pub fn with_writer<W: Write + 'static>(writer: W) -> Self {
        Self {
            writer: Box::new(writer),
            colored: false,
        }
    }

    pub fn render(&mut self, result: &DiffResult) -> io::Result<()> {
        if !result.has_changes() {
            writeln!(self.writer, "No changes")?;
            return Ok(());
        }

        for change in &result.changes {
            self.render_change(change)?;
        }
        Ok(())
    }

    fn render_change(&mut self, change: &ResourceChange) -> io::Result<()> {
        let color = match change.change_type {
            ChangeType::Added => Style::new().green(),
            ChangeType::Modified => Style::new().yellow(),
            ChangeType::Removed => Style::new().red(),
        };
        let header = format!("{} ({})", change.display_name(), change.change_type);
        writeln!(self.writer, "{}", self.paint(&color.bold(), &header))?;

        let Some(diff) = &change.diff else {
            return Ok(());
        };
        for line in &diff.lines {
            let (prefix, color) = match line.line_type {
                LineType::Added => ("+", Style::new().green()),
                LineType::Removed => ("-", Style::new().red()),
                LineType::Context => (" ", Style::new().dim()),
            };
            let text = format!("{}{}", prefix, line.content);
            writeln!(self.writer, "{}", self.paint(&color, &text))?;
        }
        writeln!(self.writer)?;
        Ok(())
    }

    fn paint(&self, color: &Style, text: &str) -> String {
        if self.colored {
            color.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }
}
