use anyhow::{Context as _, Result};
use colored::Colorize;
use converge::{ProviderRecord, RunReport, StateStore as _, spec_hash};
use std::collections::{BTreeMap, BTreeSet};

use crate::Context;
use crate::cli::{RunArgs, StatusArgs};
use crate::commands;
use crate::config::Manifest;
use crate::ui;

/// How a declared or recorded resource relates to state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drift {
    /// Recorded with the declared spec
    InSync,
    /// Recorded, but the declaration changed since
    Changed,
    /// Declared, never applied
    NotApplied,
    /// Recorded, no longer declared
    Orphaned,
}

impl Drift {
    fn label(self) -> colored::ColoredString {
        match self {
            Self::InSync => "in sync".green(),
            Self::Changed => "changed".yellow(),
            Self::NotApplied => "not applied".cyan(),
            Self::Orphaned => "orphaned".red(),
        }
    }
}

pub fn run(ctx: &Context, args: &StatusArgs) -> Result<()> {
    let session = commands::open(ctx, &RunArgs::default(), false)?;
    let store = session.controller.store();
    let last = store.last_report()?;

    if args.json {
        let json = serde_json::to_string_pretty(&last).context("Failed to serialize report")?;
        println!("{json}");
        return Ok(());
    }

    let records = store.list()?;
    ui::header("Stratum Status");
    ui::kv("Manifest", &session.manifest.path.display().to_string());
    ui::kv("State", &session.state_path.display().to_string());

    ui::section("Providers");
    for (kind, provider) in &session.manifest.providers {
        println!("  {:<24} {}", kind, provider.type_name().dimmed());
    }

    ui::section("Resources");
    let rows = compare(&session.manifest, &records);
    if rows.is_empty() {
        ui::dim("Nothing declared or recorded");
    }
    for (id, (drift, record)) in &rows {
        match record {
            Some(record) => println!(
                "  {:<24} {:<14} {:<12} {} {}",
                id,
                record.kind.dimmed(),
                drift.label(),
                record.updated_at.format("%Y-%m-%d %H:%M:%S"),
                record.backend_id.dimmed()
            ),
            None => println!("  {:<24} {:<14} {}", id, "", drift.label()),
        }
    }

    ui::section("Last run");
    match &last {
        Some(report) => print_last(report),
        None => ui::dim("No runs yet"),
    }
    Ok(())
}

/// Pair declarations with records, keyed by id
pub fn compare<'a>(
    manifest: &Manifest,
    records: &'a [ProviderRecord],
) -> BTreeMap<String, (Drift, Option<&'a ProviderRecord>)> {
    let by_id: BTreeMap<&str, &ProviderRecord> = records
        .iter()
        .map(|r| (r.resource_id.as_str(), r))
        .collect();
    let mut declared = BTreeSet::new();
    let mut rows = BTreeMap::new();

    for decl in &manifest.resources {
        declared.insert(decl.id.as_str());
        let row = match by_id.get(decl.id.as_str()) {
            Some(record) if record.kind == decl.kind && record.spec_hash == spec_hash(&decl.spec) => {
                (Drift::InSync, Some(*record))
            }
            Some(record) => (Drift::Changed, Some(*record)),
            None => (Drift::NotApplied, None),
        };
        rows.insert(decl.id.clone(), row);
    }

    for record in records {
        if !declared.contains(record.resource_id.as_str()) {
            rows.insert(record.resource_id.clone(), (Drift::Orphaned, Some(record)));
        }
    }
    rows
}

fn print_last(report: &RunReport) {
    let s = report.summary();
    ui::kv("Run", &format!("{} ({})", report.run_id, report.mode));
    ui::kv(
        "Finished",
        &report.finished_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    ui::kv(
        "Outcome",
        &format!(
            "{} created, {} updated, {} deleted, {} unchanged, {} skipped, {} failed",
            s.created, s.updated, s.deleted, s.unchanged, s.skipped, s.failed
        ),
    );
    for failed in report.failed() {
        println!(
            "  {} {} {}",
            ui::action_icon(failed.action),
            failed.id,
            failed.message.as_deref().unwrap_or_default().dimmed()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use converge::Declaration;

    #[test]
    fn test_compare_classifies_every_resource() {
        let kong = Declaration::new("kong-ns", "namespace").with("name", "kong");
        let surreal = Declaration::new("surrealdb-ns", "namespace").with("name", "surrealdb");
        let tidb = Declaration::new("tidb-ns", "namespace").with("name", "tidb");

        let mut stale = surreal.clone();
        stale.spec.insert("name".into(), "old".into());
        let gone = Declaration::new("legacy-ns", "namespace");

        let records = vec![
            ProviderRecord::new(&kong, "ns/kong".into(), None),
            ProviderRecord::new(&stale, "ns/surrealdb".into(), None),
            ProviderRecord::new(&gone, "ns/legacy".into(), None),
        ];
        let manifest = Manifest {
            resources: vec![kong, surreal, tidb],
            ..Manifest::default()
        };

        let rows = compare(&manifest, &records);
        assert_eq!(rows["kong-ns"].0, Drift::InSync);
        assert_eq!(rows["surrealdb-ns"].0, Drift::Changed);
        assert_eq!(rows["tidb-ns"].0, Drift::NotApplied);
        assert!(rows["tidb-ns"].1.is_none());
        assert_eq!(rows["legacy-ns"].0, Drift::Orphaned);
    }
}
