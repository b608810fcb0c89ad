use anyhow::Result;
use converge::{Controller, Declaration, Plan, RunMode, RunReport};
use std::path::Path;

use crate::Context;
use crate::cli::{ApplyArgs, DestroyArgs};
use crate::commands::{self, plan::print_plan};
use crate::progress::RunProgress;
use crate::ui;

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    if args.prune && !args.run.targets.is_empty() {
        ui::warn("--prune is ignored when --target is given");
    }
    let session = commands::open(ctx, &args.run, args.prune)?;
    let declarations = session.manifest.declarations();
    let plan = session.controller.plan(declarations.clone())?;

    converge_to(
        ctx,
        &session.controller,
        declarations,
        &plan,
        args.yes,
        args.report.as_deref(),
    )
}

pub fn destroy(ctx: &Context, args: &DestroyArgs) -> Result<()> {
    let session = commands::open(ctx, &args.run, false)?;
    let declarations = session.manifest.declarations();
    let plan = session.controller.plan_destroy(declarations.clone())?;

    converge_to(
        ctx,
        &session.controller,
        declarations,
        &plan,
        args.yes,
        args.report.as_deref(),
    )
}

fn converge_to(
    ctx: &Context,
    controller: &Controller,
    declarations: Vec<Declaration>,
    plan: &Plan,
    yes: bool,
    report_path: Option<&Path>,
) -> Result<()> {
    print_plan(ctx, plan);
    if !plan.has_changes() {
        return Ok(());
    }

    let prompt = match plan.mode {
        RunMode::Apply => "Apply these changes?",
        RunMode::Destroy => "Destroy these resources?",
    };
    if !commands::confirm(prompt, yes)? {
        ui::info("Cancelled");
        return Ok(());
    }

    commands::cancel_on_interrupt(controller.cancel_token());
    println!();

    let report = run(ctx, controller, declarations, plan)?;
    commands::finish_run(ctx, &report, report_path)
}

fn run(
    ctx: &Context,
    controller: &Controller,
    declarations: Vec<Declaration>,
    plan: &Plan,
) -> Result<RunReport> {
    let progress = RunProgress::new(plan.entries.len(), ctx.quiet);
    let report = match plan.mode {
        RunMode::Apply => controller.apply_with(declarations, &progress),
        RunMode::Destroy => controller.destroy_with(declarations, &progress),
    };
    progress.finish();
    Ok(report?)
}
