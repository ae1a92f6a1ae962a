#![allow(dead_code)]

use colored::{ColoredString, Colorize};
use provision::{OpKind, Plan, ResourceOutcome, RunSummary};
use serde_json::Value as Json;

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
    println!("{}", "─".repeat(title.len()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

// ============================================================================
// Plan Rendering
// ============================================================================

pub fn op_symbol(kind: OpKind) -> ColoredString {
    match kind {
        OpKind::Create => "+".green(),
        OpKind::Update => "~".yellow(),
        OpKind::Replace => "±".magenta(),
        OpKind::Delete => "-".red(),
        OpKind::NoOp => " ".normal(),
    }
}

/// Render an attribute value for display, redacting secrets.
pub fn render_value(value: Option<&Json>, secret: bool) -> String {
    if secret {
        return "(secret)".to_string();
    }
    match value {
        None => "(none)".to_string(),
        Some(Json::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Print a plan: one line per operation, attribute diffs indented.
pub fn render_plan(plan: &Plan, verbose: bool) {
    for op in &plan.ops {
        if op.kind == OpKind::NoOp {
            if verbose {
                println!(
                    "    {} {}",
                    op.name.dimmed(),
                    "(unchanged)".dimmed()
                );
            }
            continue;
        }

        println!(
            "  {} {} {}",
            op_symbol(op.kind).bold(),
            op.name.bold(),
            format!("({})", op.resource_type).dimmed()
        );

        for change in &op.changes {
            let diff = format!(
                "{} -> {}",
                render_value(change.old.as_ref(), change.secret),
                render_value(change.new.as_ref(), change.secret)
            );
            if change.forces_replacement {
                println!(
                    "      {}: {} {}",
                    change.key,
                    diff,
                    "(forces replacement)".red()
                );
            } else {
                println!("      {}: {}", change.key, diff.dimmed());
            }
        }
    }

    println!();
    println!(
        "  {} to create, {} to update, {} to replace, {} to delete, {} unchanged",
        plan.count(OpKind::Create).to_string().green(),
        plan.count(OpKind::Update).to_string().yellow(),
        plan.count(OpKind::Replace).to_string().magenta(),
        plan.count(OpKind::Delete).to_string().red(),
        plan.count(OpKind::NoOp)
    );
}

// ============================================================================
// Run Summary
// ============================================================================

pub fn render_summary(summary: &RunSummary) {
    for (name, outcome) in &summary.outcomes {
        match outcome {
            ResourceOutcome::Created => println!("  {} {} created", "✓".green(), name),
            ResourceOutcome::Updated => println!("  {} {} updated", "✓".green(), name),
            ResourceOutcome::Replaced => println!("  {} {} replaced", "✓".green(), name),
            ResourceOutcome::Deleted => println!("  {} {} deleted", "✓".green(), name),
            ResourceOutcome::Unchanged => {}
            ResourceOutcome::Failed { reason } => {
                println!("  {} {} failed: {}", "✗".red(), name.bold(), reason);
            }
            ResourceOutcome::Skipped { blocked_by } => {
                println!(
                    "  {} {} skipped {}",
                    "⚠".yellow(),
                    name,
                    format!("(blocked by {blocked_by})").dimmed()
                );
            }
        }
    }

    let tally = summary.tally();
    println!();
    println!(
        "  {} created, {} updated, {} replaced, {} deleted, {} unchanged, {} failed, {} skipped",
        tally.created, tally.updated, tally.replaced, tally.deleted, tally.unchanged,
        tally.failed, tally.skipped
    );

    if !summary.outputs.is_empty() {
        section("Outputs");
        for (key, value) in &summary.outputs {
            kv(key, &render_value(Some(value), false));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn secrets_are_redacted() {
        assert_eq!(render_value(Some(&json!("hunter2")), true), "(secret)");
        assert_eq!(render_value(Some(&json!("visible")), false), "visible");
        assert_eq!(render_value(None, false), "(none)");
    }

    #[test]
    fn non_string_values_render_as_json() {
        assert_eq!(render_value(Some(&json!(5432)), false), "5432");
        assert_eq!(
            render_value(Some(&json!({"Name": "demo"})), false),
            r#"{"Name":"demo"}"#
        );
    }
}
