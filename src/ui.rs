use anyhow::Result;
use colored::{ColoredString, Colorize};
use converge::{Action, ChangeDescriptor, RunReport, RunSummary};
use std::collections::BTreeMap;

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Ask before doing something irreversible
pub fn confirm(prompt: &str) -> Result<bool> {
    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Truncate a name for display, keeping the end
pub fn truncate(text: &str, max_len: usize) -> String {
    let len = text.chars().count();
    if len <= max_len {
        text.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let tail: String = text.chars().skip(len - max_len + 3).collect();
        format!("...{tail}")
    }
}

// ============================================================================
// Changes
// ============================================================================

fn marker(action: Action) -> ColoredString {
    let symbol = action.symbol().to_string();
    match action {
        Action::Create => symbol.green(),
        Action::Update => symbol.yellow(),
        Action::Replace => symbol.magenta(),
        Action::Delete => symbol.red(),
        Action::NoChange => symbol.dimmed(),
    }
}

fn resource_title(resource_type: &str) -> &str {
    match resource_type {
        "vpc" => "VPCs",
        "security_group" => "Security groups",
        "security_group_rule" => "Ingress rules",
        other => other,
    }
}

/// Display a list of changes grouped by resource type
pub fn display_changes(changes: &[ChangeDescriptor]) {
    let changes: Vec<&ChangeDescriptor> = changes.iter().filter(|c| !c.is_no_change()).collect();
    if changes.is_empty() {
        println!();
        println!("  {} No changes needed", "✓".green());
        return;
    }

    let mut by_type: BTreeMap<&str, Vec<&ChangeDescriptor>> = BTreeMap::new();
    for change in &changes {
        by_type
            .entry(change.resource_type.as_str())
            .or_default()
            .push(change);
    }

    println!();
    println!(
        "┌─ {} ─────────────────────────────────────────┐",
        "Planned Changes".bold()
    );
    println!("│");

    for (resource_type, type_changes) in &by_type {
        println!("│ {}", resource_title(resource_type).bold());
        for change in type_changes {
            println!(
                "│   {} {:<30} {}",
                marker(change.action),
                change.task,
                format!("({})", change.action).dimmed()
            );
            for delta in &change.deltas {
                let from = delta.actual.as_deref().unwrap_or("(none)");
                let to = delta.desired.as_deref().unwrap_or("(none)");
                println!(
                    "│       {}: {} → {}",
                    delta.field.dimmed(),
                    from.dimmed(),
                    to
                );
            }
        }
        println!("│");
    }

    println!("├─────────────────────────────────────────────────────┤");
    println!(
        "│ Summary: {} changes",
        changes.len().to_string().bold()
    );
    println!("└─────────────────────────────────────────────────────┘");
}

// ============================================================================
// Reports
// ============================================================================

/// Print failures, skips and warnings of a run
pub fn display_problems(report: &RunReport) {
    for (task, error) in report.failures() {
        self::error(&format!("{task}: {error}"));
        dim(error.category().description());
    }
    for (task, cause) in report.skipped() {
        if report.outcome(task).is_some_and(|outcome| outcome.is_problem()) {
            warn(&format!("{task}: skipped, {cause}"));
        }
    }
    for (task, message) in report.warnings() {
        warn(&format!("{task}: {message}"));
    }
    if let Some(interrupt) = report.interrupt() {
        warn(&format!("{interrupt} before every task started"));
    }
}

/// One-line summary of a finished run
pub fn summary_line(summary: &RunSummary) -> String {
    let mut parts = Vec::new();
    for (count, label) in [
        (summary.created, "created"),
        (summary.updated, "updated"),
        (summary.replaced, "replaced"),
        (summary.deleted, "deleted"),
        (summary.unchanged, "unchanged"),
        (summary.failed, "failed"),
        (summary.skipped, "skipped"),
    ] {
        if count > 0 {
            parts.push(format!("{count} {label}"));
        }
    }
    if parts.is_empty() {
        "nothing to do".to_string()
    } else {
        parts.join(", ")
    }
}

/// Print the final summary of a run
pub fn print_summary(report: &RunReport) {
    let summary = report.summary();
    let line = summary_line(&summary);
    println!();
    if report.is_success() {
        success(&line);
    } else {
        error(&line);
    }
}
