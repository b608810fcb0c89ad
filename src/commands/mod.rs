pub mod apply;
pub mod graph;
pub mod plan;
pub mod status;

use anyhow::{Context as _, Result, bail};
use converge::{
    CancelToken, Controller, ExecuteOptions, FileStateStore, RetryPolicy, RunOptions, RunReport,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::Context;
use crate::cli::RunArgs;
use crate::config::{Manifest, Settings};
use crate::{paths, providers, ui};

/// Default parallel provider calls
const DEFAULT_JOBS: usize = 4;

/// Everything a command needs: the manifest and a controller wired to it
pub struct Session {
    pub manifest: Manifest,
    pub controller: Controller,
    pub state_path: PathBuf,
}

/// Load the manifest, open its state and build the providers
pub fn open(ctx: &Context, run: &RunArgs, prune: bool) -> Result<Session> {
    let manifest = Manifest::load(&ctx.file)?;
    let state_path = paths::state_file(
        &ctx.file,
        ctx.state.as_deref(),
        manifest.settings.state.as_deref(),
    )?;
    log::debug!("Using state file {}", state_path.display());

    let store = FileStateStore::open(&state_path)
        .with_context(|| format!("Failed to open state {}", state_path.display()))?;
    let registry = providers::registry(&manifest)?;
    let controller = Controller::new(registry, Arc::new(store))
        .with_options(run_options(&manifest.settings, run, prune));

    Ok(Session {
        manifest,
        controller,
        state_path,
    })
}

/// Command-line flags override manifest settings
pub fn run_options(settings: &Settings, run: &RunArgs, prune: bool) -> RunOptions {
    let mut retry = RetryPolicy::default();
    if let Some(max_attempts) = settings.max_attempts {
        retry.max_attempts = max_attempts;
    }
    if let Some(secs) = settings.retry_delay_secs {
        retry.base_delay = Duration::from_secs_f64(secs.max(0.0));
    }

    RunOptions {
        execute: ExecuteOptions {
            jobs: run.jobs.or(settings.jobs).unwrap_or(DEFAULT_JOBS).max(1),
            operation_timeout: run
                .timeout
                .or(settings.timeout_secs)
                .map(Duration::from_secs),
            retry,
        },
        prune,
        targets: run.targets.clone(),
    }
}

/// Ask before mutating, unless `yes`
pub fn confirm(prompt: &str, yes: bool) -> Result<bool> {
    if yes {
        return Ok(true);
    }
    if !console::user_attended() {
        bail!("Not running in a terminal; pass --yes to proceed without confirmation");
    }

    let confirmed = dialoguer::Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()?;
    Ok(confirmed)
}

/// Ctrl-C stops dispatching new resources; calls in flight finish
pub fn cancel_on_interrupt(token: CancelToken) {
    let result = ctrlc::set_handler(move || {
        if !token.is_cancelled() {
            eprintln!("\nInterrupted: waiting for in-flight calls to finish...");
        }
        token.cancel();
    });
    if let Err(e) = result {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }
}

/// Print the outcome, write the report if asked, fail if anything failed
pub fn finish_run(ctx: &Context, report: &RunReport, report_path: Option<&Path>) -> Result<()> {
    if let Some(path) = report_path {
        write_report(report, path)?;
    }

    let summary = report.summary();
    if !ctx.quiet {
        println!();
        if summary.created > 0 {
            println!("  • {} created", summary.created);
        }
        if summary.updated > 0 {
            println!("  • {} updated", summary.updated);
        }
        if summary.deleted > 0 {
            println!("  • {} deleted", summary.deleted);
        }
        if summary.unchanged > 0 {
            println!("  • {} unchanged", summary.unchanged);
        }
        if summary.skipped > 0 {
            println!("  • {} skipped", summary.skipped);
        }
        if ctx.verbose > 0 {
            for resource in report.resources.iter().filter(|r| r.attempts > 1) {
                ui::dim(&format!("{} took {} attempts", resource.id, resource.attempts));
            }
        }
    }

    if report.is_success() {
        ui::success(&format!("Run {} complete", report.run_id));
        return Ok(());
    }

    for failed in report.failed() {
        ui::error(&format!(
            "{}: {}",
            failed.id,
            failed.message.as_deref().unwrap_or("failed")
        ));
    }
    bail!(
        "Run {} finished with {} failed resources",
        report.run_id,
        report.failed().count()
    )
}

pub fn write_report(report: &RunReport, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }
    let json = report.to_json().context("Failed to serialize run report")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    log::info!("Wrote run report to {}", path.display());
    Ok(())
}
