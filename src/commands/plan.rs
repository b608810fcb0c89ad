use anyhow::Result;
use colored::Colorize;
use converge::{FieldChange, Plan, PlannedAction};
use serde_json::Value;

use crate::Context;
use crate::cli::PlanArgs;
use crate::commands;
use crate::ui;

pub fn run(ctx: &Context, args: &PlanArgs) -> Result<()> {
    let session = commands::open(ctx, &args.run, args.prune)?;
    let declarations = session.manifest.declarations();

    let plan = if args.destroy {
        session.controller.plan_destroy(declarations)?
    } else {
        session.controller.plan(declarations)?
    };

    print_plan(ctx, &plan);
    Ok(())
}

/// Render a plan, one line per resource, with field changes under updates
pub fn print_plan(ctx: &Context, plan: &Plan) {
    ui::header(&format!("Plan: {}", plan.mode));

    let mut layer = None;
    for entry in &plan.entries {
        if !entry.action.is_change() && ctx.quiet {
            continue;
        }
        if layer != Some(entry.layer) {
            layer = Some(entry.layer);
            ui::section(&format!("Layer {}", entry.layer + 1));
        }

        let orphan = if entry.orphan { " (not declared)" } else { "" };
        println!(
            "  {} {} {}{}",
            verb(&entry.action),
            entry.id.bold(),
            format!("[{}]", entry.kind).dimmed(),
            orphan.dimmed()
        );

        match &entry.action {
            PlannedAction::Update(changes) => {
                for change in &changes.changes {
                    for line in field_lines(change) {
                        print_line(&line);
                    }
                }
            }
            PlannedAction::Replace { from_kind } => {
                ui::dim(&format!("    kind {from_kind} -> {}", entry.kind));
            }
            _ => {}
        }
    }

    let summary = plan.summary();
    println!();
    if plan.has_changes() {
        ui::info(&format!(
            "{} to create, {} to update, {} to delete, {} unchanged",
            summary.create, summary.update, summary.delete, summary.unchanged
        ));
    } else {
        ui::success("No changes. Everything matches the manifest.");
    }
}

fn verb(action: &PlannedAction) -> colored::ColoredString {
    let text = format!("{:<8}", action.verb());
    match action {
        PlannedAction::Create | PlannedAction::Recreate => text.green(),
        PlannedAction::Replace { .. } => text.magenta(),
        PlannedAction::Update(_) => text.yellow(),
        PlannedAction::Delete => text.red(),
        PlannedAction::NoOp => text.dimmed(),
    }
}

fn print_line(line: &str) {
    match line.chars().next() {
        Some('-') => println!("      {}", line.red()),
        Some('+') => println!("      {}", line.green()),
        _ => println!("      {}", line.yellow()),
    }
}

/// Lines describing one field change.
///
/// Multi-line strings get a line diff; everything else is shown whole.
pub fn field_lines(change: &FieldChange) -> Vec<String> {
    let key = &change.key;
    match (&change.before, &change.after) {
        (None, Some(after)) => vec![format!("+ {key} = {}", render(after))],
        (Some(before), None) => vec![format!("- {key} = {}", render(before))],
        (Some(Value::String(before)), Some(Value::String(after)))
            if before.contains('\n') || after.contains('\n') =>
        {
            let mut lines = vec![format!("~ {key}:")];
            let diff = similar::TextDiff::from_lines(before.as_str(), after.as_str());
            for change in diff.iter_all_changes() {
                let text = change.to_string();
                let text = text.trim_end_matches('\n');
                match change.tag() {
                    similar::ChangeTag::Delete => lines.push(format!("-   {text}")),
                    similar::ChangeTag::Insert => lines.push(format!("+   {text}")),
                    similar::ChangeTag::Equal => {}
                }
            }
            lines
        }
        (Some(before), Some(after)) => {
            vec![format!("~ {key} = {} -> {}", render(before), render(after))]
        }
        (None, None) => Vec::new(),
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => format!("{s:?}"),
        other => other.to_string(),
    }
}
