//! Reconciliation controller: one entry point per run
//!
//! A run validates the declarations (graph, kinds, targets) and reads what it
//! needs from the state store before the first mutating call, so declaration
//! and state errors abort cleanly. After that every failure is per resource and
//! ends up in the [`RunReport`].

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::context::{CancelToken, NoProgress, ProgressCallback, RunMode};
use crate::diff::Diff;
use crate::error::{Error, Operation, Result};
use crate::executor::{ExecuteOptions, Executor};
use crate::graph::{DependencyGraph, Direction};
use crate::plan::{Plan, PlanEntry, PlannedAction};
use crate::provider::ProviderRegistry;
use crate::report::{ResourceReport, RunReport};
use crate::retry::retry_result;
use crate::state::StateStore;
use crate::types::Declaration;

/// Options for a run
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub execute: ExecuteOptions,
    /// Tear down recorded resources that are no longer declared (apply only)
    pub prune: bool,
    /// Restrict the run to these ids and their dependencies (or dependents,
    /// on destroy)
    pub targets: Vec<String>,
}

pub struct Controller {
    registry: ProviderRegistry,
    store: Arc<dyn StateStore>,
    options: RunOptions,
    cancel: CancelToken,
}

impl Controller {
    pub fn new(registry: ProviderRegistry, store: Arc<dyn StateStore>) -> Self {
        Self {
            registry,
            store,
            options: RunOptions::default(),
            cancel: CancelToken::new(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn store(&self) -> &dyn StateStore {
        self.store.as_ref()
    }

    /// Token that cancels any run of this controller
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    // ========================================================================
    // Plan
    // ========================================================================

    /// What `apply` would do, without mutating anything
    pub fn plan(&self, declarations: Vec<Declaration>) -> Result<Plan> {
        let full = DependencyGraph::build(declarations)?;
        let graph = self.narrow(&full, Direction::Dependencies)?;
        self.registry.check(&graph)?;

        let mut entries = Vec::with_capacity(graph.len());
        for (layer, decls) in graph.topological_layers().into_iter().enumerate() {
            for decl in decls {
                entries.push(PlanEntry {
                    id: decl.id.clone(),
                    kind: decl.kind.clone(),
                    layer,
                    action: self.planned_action(decl)?,
                    orphan: false,
                });
            }
        }

        if let Some(orphans) = self.prune_graph(&full)? {
            let base = entries.iter().map(|e| e.layer + 1).max().unwrap_or(0);
            entries.extend(delete_entries(&orphans, base, true));
        }

        Ok(Plan {
            mode: RunMode::Apply,
            entries,
        })
    }

    /// What `destroy` would do, without mutating anything
    pub fn plan_destroy(&self, declarations: Vec<Declaration>) -> Result<Plan> {
        let declared: HashSet<String> = declarations.iter().map(|d| d.id.clone()).collect();
        let graph = self.destroy_graph(declarations)?;
        let mut entries = delete_entries(&graph, 0, false);
        for entry in &mut entries {
            entry.orphan = !declared.contains(&entry.id);
            if self.store.get(&entry.id)?.is_none() {
                entry.action = PlannedAction::NoOp;
            }
        }
        Ok(Plan {
            mode: RunMode::Destroy,
            entries,
        })
    }

    fn planned_action(&self, decl: &Declaration) -> Result<PlannedAction> {
        let Some(record) = self.store.get(&decl.id)? else {
            return Ok(PlannedAction::Create);
        };
        if record.kind != decl.kind {
            return Ok(PlannedAction::Replace {
                from_kind: record.kind,
            });
        }

        let provider = self
            .registry
            .get(&decl.kind)
            .ok_or_else(|| Error::UnknownKind {
                id: decl.id.clone(),
                kind: decl.kind.clone(),
            })?;
        let label = format!("read {}", decl.id);
        let observed = retry_result(&self.options.execute.retry, &label, || {
            provider.read(&record.backend_id)
        })
        .map_err(|source| Error::Provider {
            id: decl.id.clone(),
            operation: Operation::Read,
            source,
        })?;

        if observed.is_none() {
            return Ok(PlannedAction::Recreate);
        }
        Ok(match provider.diff(&record.last_applied_spec, &decl.spec) {
            Diff::NoChange => PlannedAction::NoOp,
            Diff::Changes(changes) => PlannedAction::Update(changes),
        })
    }

    // ========================================================================
    // Runs
    // ========================================================================

    pub fn apply(&self, declarations: Vec<Declaration>) -> Result<RunReport> {
        self.apply_with(declarations, &NoProgress)
    }

    /// Converge the backend to `declarations`
    pub fn apply_with(
        &self,
        declarations: Vec<Declaration>,
        progress: &dyn ProgressCallback,
    ) -> Result<RunReport> {
        let full = DependencyGraph::build(declarations)?;
        let graph = self.narrow(&full, Direction::Dependencies)?;
        self.registry.check(&graph)?;
        let orphans = self.prune_graph(&full)?;

        let run_id = self.store.next_run_id()?;
        let started_at = Utc::now();
        log::info!("Run {run_id}: applying {} resources", graph.len());

        let executor = self.executor(progress);
        let mut resources = executor.run(&graph, RunMode::Apply)?;
        if let Some(orphans) = orphans {
            log::info!("Run {run_id}: pruning {} orphaned resources", orphans.len());
            resources.extend(executor.run(&orphans, RunMode::Destroy)?);
        }

        Ok(self.finish(run_id, RunMode::Apply, started_at, resources))
    }

    pub fn destroy(&self, declarations: Vec<Declaration>) -> Result<RunReport> {
        self.destroy_with(declarations, &NoProgress)
    }

    /// Tear down declared resources, and recorded orphans unless targeted
    pub fn destroy_with(
        &self,
        declarations: Vec<Declaration>,
        progress: &dyn ProgressCallback,
    ) -> Result<RunReport> {
        let graph = self.destroy_graph(declarations)?;

        let run_id = self.store.next_run_id()?;
        let started_at = Utc::now();
        log::info!("Run {run_id}: destroying {} resources", graph.len());

        let resources = self.executor(progress).run(&graph, RunMode::Destroy)?;
        Ok(self.finish(run_id, RunMode::Destroy, started_at, resources))
    }

    fn executor<'a>(&'a self, progress: &'a dyn ProgressCallback) -> Executor<'a> {
        Executor::new(
            &self.registry,
            self.store.as_ref(),
            &self.options.execute,
            &self.cancel,
            progress,
        )
    }

    fn finish(
        &self,
        run_id: u64,
        mode: RunMode,
        started_at: DateTime<Utc>,
        resources: Vec<ResourceReport>,
    ) -> RunReport {
        let report = RunReport {
            run_id,
            mode,
            started_at,
            finished_at: Utc::now(),
            resources,
        };

        let s = report.summary();
        log::info!(
            "Run {run_id} ({mode}): {} created, {} updated, {} deleted, {} unchanged, {} skipped, {} failed",
            s.created,
            s.updated,
            s.deleted,
            s.unchanged,
            s.skipped,
            s.failed
        );

        if let Err(e) = self.store.save_report(&report) {
            log::error!("Failed to save report of run {run_id}: {e}");
        }
        report
    }

    // ========================================================================
    // Graph preparation
    // ========================================================================

    fn narrow(&self, full: &DependencyGraph, direction: Direction) -> Result<DependencyGraph> {
        if self.options.targets.is_empty() {
            Ok(full.clone())
        } else {
            full.select(&self.options.targets, direction)
        }
    }

    /// Recorded resources that `full` does not declare
    fn orphans(&self, full: &DependencyGraph) -> Result<Vec<Declaration>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|r| !full.contains(&r.resource_id))
            .map(|r| r.to_declaration())
            .collect())
    }

    /// Graph of orphans to prune after apply, if pruning applies
    fn prune_graph(&self, full: &DependencyGraph) -> Result<Option<DependencyGraph>> {
        if !self.options.prune {
            return Ok(None);
        }
        if !self.options.targets.is_empty() {
            log::warn!("Pruning is skipped when the run is restricted to targets");
            return Ok(None);
        }

        let orphans = self.orphans(full)?;
        if orphans.is_empty() {
            return Ok(None);
        }
        let graph = DependencyGraph::build(retain_known_edges(orphans))?;
        self.registry.check(&graph)?;
        Ok(Some(graph))
    }

    /// Declarations plus recorded orphans, narrowed to dependents of targets
    fn destroy_graph(&self, declarations: Vec<Declaration>) -> Result<DependencyGraph> {
        let full = DependencyGraph::build(declarations)?;
        let mut all = full.declarations().to_vec();
        all.extend(self.orphans(&full)?);
        let known = DependencyGraph::build(retain_known_edges(all))?;
        let graph = self.narrow(&known, Direction::Dependents)?;
        self.registry.check(&graph)?;
        Ok(graph)
    }
}

/// Drop recorded edges that point outside the given set
fn retain_known_edges(mut decls: Vec<Declaration>) -> Vec<Declaration> {
    let ids: HashSet<String> = decls.iter().map(|d| d.id.clone()).collect();
    for decl in &mut decls {
        decl.depends_on.retain(|dep| ids.contains(dep));
    }
    decls
}

/// Delete entries in teardown order, layers numbered from `base`
fn delete_entries(graph: &DependencyGraph, base: usize, orphan: bool) -> Vec<PlanEntry> {
    let mut layers = graph.topological_layers();
    layers.reverse();
    layers
        .into_iter()
        .enumerate()
        .flat_map(|(i, decls)| {
            decls.into_iter().map(move |decl| PlanEntry {
                id: decl.id.clone(),
                kind: decl.kind.clone(),
                layer: base + i,
                action: PlannedAction::Delete,
                orphan,
            })
        })
        .collect()
}
