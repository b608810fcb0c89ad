//! Execution engine - converges resources layer by layer with bounded parallelism
//!
//! Resources inside a topological layer have no edges between them and run
//! concurrently on a rayon pool. A layer starts only after every resource of
//! the previous one has settled, and each task sees the settled statuses of
//! earlier layers through an immutable snapshot, so a failure fast-fails its
//! dependents (or, on teardown, its dependencies) without touching siblings.

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::context::{CancelToken, ProgressCallback, RunMode};
use crate::diff::{ChangeSet, Diff};
use crate::error::{Error, Operation, ProviderError, Result};
use crate::graph::DependencyGraph;
use crate::provider::{ProviderRegistry, ProviderResult, SharedProvider};
use crate::report::ResourceReport;
use crate::retry::{RetryPolicy, with_retry};
use crate::state::{ProviderRecord, StateStore};
use crate::types::{Action, BackendId, Declaration, ResourceHandle, Spec, Status};

/// Options for executing a run
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Maximum provider calls in flight at once
    pub jobs: usize,
    /// Per-call deadline; `None` waits forever
    pub operation_timeout: Option<Duration>,
    /// Retry policy for transient provider errors
    pub retry: RetryPolicy,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            jobs: 4,
            operation_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

type Call<T> = Arc<dyn Fn() -> ProviderResult<T> + Send + Sync>;

/// Per-resource bookkeeping while a worker converges it
struct Task<'d> {
    decl: &'d Declaration,
    handle: ResourceHandle,
    attempts: u32,
    started_at: Option<DateTime<Utc>>,
}

impl<'d> Task<'d> {
    fn new(decl: &'d Declaration) -> Self {
        Self {
            decl,
            handle: ResourceHandle::new(decl),
            attempts: 0,
            started_at: None,
        }
    }

    fn id(&self) -> &str {
        &self.decl.id
    }
}

/// Runs one graph against providers and the state store
pub struct Executor<'a> {
    registry: &'a ProviderRegistry,
    store: &'a dyn StateStore,
    options: &'a ExecuteOptions,
    cancel: &'a CancelToken,
    progress: &'a dyn ProgressCallback,
}

impl<'a> Executor<'a> {
    pub fn new(
        registry: &'a ProviderRegistry,
        store: &'a dyn StateStore,
        options: &'a ExecuteOptions,
        cancel: &'a CancelToken,
        progress: &'a dyn ProgressCallback,
    ) -> Self {
        Self {
            registry,
            store,
            options,
            cancel,
            progress,
        }
    }

    /// Converge every resource in `graph`
    ///
    /// Apply walks layers in order, destroy walks them in reverse. Returns one
    /// report per resource, in declaration order. Per-resource failures are
    /// reported, not returned; only failing to start the worker pool is an
    /// error.
    pub fn run(&self, graph: &DependencyGraph, mode: RunMode) -> Result<Vec<ResourceReport>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.jobs.max(1))
            .thread_name(|i| format!("converge-{i}"))
            .build()
            .map_err(|e| Error::ThreadPool(e.to_string()))?;

        let mut layers = graph.topological_layers();
        if mode == RunMode::Destroy {
            layers.reverse();
        }

        let total = layers.len();
        let mut statuses: HashMap<String, Status> = HashMap::with_capacity(graph.len());
        let mut reports: HashMap<String, ResourceReport> = HashMap::with_capacity(graph.len());

        for (index, layer) in layers.iter().enumerate() {
            let ids: Vec<String> = layer.iter().map(|d| d.id.clone()).collect();
            log::debug!("{mode} layer {}/{total}: {}", index + 1, ids.join(", "));
            self.progress.on_layer_start(index, total, &ids);

            let snapshot = &statuses;
            let settled: Vec<ResourceReport> = pool.install(|| {
                layer
                    .par_iter()
                    .map(|decl| self.settle(graph, decl, mode, snapshot))
                    .collect()
            });

            for report in settled {
                statuses.insert(report.id.clone(), report.status);
                reports.insert(report.id.clone(), report);
            }
            self.progress.on_layer_complete(index);
        }

        Ok(graph
            .declarations()
            .iter()
            .filter_map(|d| reports.remove(&d.id))
            .collect())
    }

    /// Drive one resource to a terminal status and report it
    fn settle(
        &self,
        graph: &DependencyGraph,
        decl: &Declaration,
        mode: RunMode,
        statuses: &HashMap<String, Status>,
    ) -> ResourceReport {
        let mut task = Task::new(decl);
        let outcome = match mode {
            RunMode::Apply => self.apply_one(&mut task, statuses),
            RunMode::Destroy => self.destroy_one(graph, &mut task, statuses),
        };

        let mut report = match outcome {
            Ok(action) => {
                log::info!("{}: {}", task.id(), task.handle.status());
                ResourceReport::succeeded(&decl.id, &decl.kind, task.handle.status(), action)
            }
            Err(err) => {
                if let Err(e) = task.handle.transition(Status::Failed) {
                    log::error!("{e}");
                }
                match err {
                    Error::DependencyFailed { .. } | Error::Cancelled { .. } => log::warn!("{err}"),
                    _ => log::error!("{err}"),
                }
                ResourceReport::failed(&decl.id, &decl.kind, &err)
            }
        };

        report.attempts = task.attempts;
        report.started_at = task.started_at;
        report.finished_at = task.started_at.map(|_| Utc::now());
        self.progress.on_resource_complete(&report);
        report
    }

    /// Mark the task dispatched
    fn start(&self, task: &mut Task<'_>) {
        task.started_at = Some(Utc::now());
        self.progress.on_resource_start(task.id());
    }

    fn provider(&self, id: &str, kind: &str) -> Result<SharedProvider> {
        self.registry
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::UnknownKind {
                id: id.to_string(),
                kind: kind.to_string(),
            })
    }

    // ========================================================================
    // Apply
    // ========================================================================

    fn apply_one(&self, task: &mut Task<'_>, statuses: &HashMap<String, Status>) -> Result<Action> {
        let decl = task.decl;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                id: decl.id.clone(),
            });
        }
        if let Some(blocker) = decl
            .depends_on
            .iter()
            .find(|dep| statuses.get(dep.as_str()) != Some(&Status::Ready))
        {
            return Err(Error::DependencyFailed {
                id: decl.id.clone(),
                blocker: blocker.clone(),
            });
        }

        self.start(task);
        let provider = self.provider(&decl.id, &decl.kind)?;

        if let Some(record) = self.store.get(&decl.id)? {
            if record.kind == decl.kind {
                if let Some(action) = self.refresh_and_update(task, &provider, &record)? {
                    return Ok(action);
                }
            } else {
                self.replace(task, &record)?;
            }
        }

        task.handle.transition(Status::Creating)?;
        let backend_id = self.create(task, &provider)?;
        let observed = self.read_back(task, &provider, &backend_id);
        self.store
            .put(ProviderRecord::new(decl, backend_id, observed))?;
        task.handle.transition(Status::Ready)?;
        Ok(Action::Created)
    }

    /// Existing record: read the backend and update if the spec drifted.
    /// Returns `None` when the backend object is gone and must be re-created.
    fn refresh_and_update(
        &self,
        task: &mut Task<'_>,
        provider: &SharedProvider,
        record: &ProviderRecord,
    ) -> Result<Option<Action>> {
        let decl = task.decl;
        let observed = self.read(task, provider, &record.backend_id)?;
        if observed.is_none() {
            log::warn!(
                "{}: backend object {} is gone, re-creating",
                decl.id,
                record.backend_id
            );
            return Ok(None);
        }

        task.handle.transition(Status::Ready)?;
        let changes = match provider.diff(&record.last_applied_spec, &decl.spec) {
            Diff::NoChange => {
                if record.depends_on != decl.depends_on {
                    log::debug!("{}: recording new dependencies", decl.id);
                    let mut refreshed = record.clone();
                    refreshed.depends_on = decl.depends_on.clone();
                    refreshed.last_observed_state = observed;
                    refreshed.updated_at = Utc::now();
                    self.store.put(refreshed)?;
                }
                return Ok(Some(Action::NoChange));
            }
            Diff::Changes(changes) => changes,
        };

        log::debug!(
            "{}: updating {}",
            decl.id,
            changes.keys().collect::<Vec<_>>().join(", ")
        );
        task.handle.transition(Status::Updating)?;
        self.update(task, provider, &record.backend_id, &changes)?;
        let observed = self.read_back(task, provider, &record.backend_id);
        self.store
            .put(ProviderRecord::new(decl, record.backend_id.clone(), observed))?;
        task.handle.transition(Status::Ready)?;
        Ok(Some(Action::Updated))
    }

    /// The kind changed since the last run: remove the old object through
    /// its own provider before creating the new one
    fn replace(&self, task: &mut Task<'_>, record: &ProviderRecord) -> Result<()> {
        log::info!(
            "{}: kind changed from '{}' to '{}', replacing",
            task.id(),
            record.kind,
            task.decl.kind
        );
        let old = self.provider(&record.resource_id, &record.kind)?;
        self.delete(task, &old, &record.backend_id)?;
        self.store.delete(&record.resource_id)?;
        Ok(())
    }

    fn create(&self, task: &mut Task<'_>, provider: &SharedProvider) -> Result<BackendId> {
        let decl = task.decl;
        let (p, id, spec) = (Arc::clone(provider), decl.id.clone(), decl.spec.clone());
        let result = self.invoke(task, Operation::Create, move || p.create(&id, &spec));

        match result {
            Ok(backend_id) => Ok(backend_id),
            Err(ProviderError::AlreadyExists { backend_id }) => {
                log::info!("{}: already exists as {backend_id}, adopting", decl.id);
                Ok(backend_id)
            }
            Err(ProviderError::Timeout { .. }) => {
                // The create may have landed; ask the backend before giving up
                let (p, id, spec) = (Arc::clone(provider), decl.id.clone(), decl.spec.clone());
                match self.invoke(task, Operation::Locate, move || p.locate(&id, &spec)) {
                    Ok(Some(backend_id)) => {
                        log::warn!(
                            "{}: create timed out but the backend has {backend_id}, adopting",
                            decl.id
                        );
                        Ok(backend_id)
                    }
                    Ok(None) => Err(Error::Timeout {
                        id: decl.id.clone(),
                        operation: Operation::Create,
                    }),
                    Err(source) => Err(Error::Provider {
                        id: decl.id.clone(),
                        operation: Operation::Locate,
                        source,
                    }),
                }
            }
            Err(source) => Err(Error::Provider {
                id: decl.id.clone(),
                operation: Operation::Create,
                source,
            }),
        }
    }

    fn update(
        &self,
        task: &mut Task<'_>,
        provider: &SharedProvider,
        backend_id: &str,
        changes: &ChangeSet,
    ) -> Result<()> {
        let decl = task.decl;
        let (p, bid, set) = (
            Arc::clone(provider),
            backend_id.to_string(),
            changes.clone(),
        );

        match self.invoke(task, Operation::Update, move || p.update(&bid, &set)) {
            Ok(()) => Ok(()),
            Err(ProviderError::Timeout { .. }) => {
                let converged = self
                    .read(task, provider, backend_id)?
                    .is_some_and(|observed| changes.is_reflected_in(&observed));
                if converged {
                    log::warn!("{}: update timed out but the backend converged", decl.id);
                    Ok(())
                } else {
                    Err(Error::Timeout {
                        id: decl.id.clone(),
                        operation: Operation::Update,
                    })
                }
            }
            Err(source) => Err(Error::Provider {
                id: decl.id.clone(),
                operation: Operation::Update,
                source,
            }),
        }
    }

    fn read(
        &self,
        task: &mut Task<'_>,
        provider: &SharedProvider,
        backend_id: &str,
    ) -> Result<Option<Spec>> {
        let (p, bid) = (Arc::clone(provider), backend_id.to_string());
        self.invoke(task, Operation::Read, move || p.read(&bid))
            .map_err(|source| Error::Provider {
                id: task.decl.id.clone(),
                operation: Operation::Read,
                source,
            })
    }

    /// Observe the object after a successful mutation. The mutation already
    /// happened, so a failed read only loses the observation.
    fn read_back(
        &self,
        task: &mut Task<'_>,
        provider: &SharedProvider,
        backend_id: &str,
    ) -> Option<Spec> {
        match self.read(task, provider, backend_id) {
            Ok(Some(observed)) => Some(observed),
            Ok(None) => {
                log::warn!("{}: {backend_id} not readable yet", task.id());
                None
            }
            Err(e) => {
                log::warn!("{e}");
                None
            }
        }
    }

    // ========================================================================
    // Destroy
    // ========================================================================

    fn destroy_one(
        &self,
        graph: &DependencyGraph,
        task: &mut Task<'_>,
        statuses: &HashMap<String, Status>,
    ) -> Result<Action> {
        let decl = task.decl;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled {
                id: decl.id.clone(),
            });
        }
        if let Some(blocker) = graph
            .dependents(&decl.id)
            .into_iter()
            .find(|dependent| statuses.get(*dependent) != Some(&Status::Deleted))
        {
            return Err(Error::DependencyFailed {
                id: decl.id.clone(),
                blocker: blocker.to_string(),
            });
        }

        self.start(task);
        let Some(record) = self.store.get(&decl.id)? else {
            log::debug!("{}: nothing recorded, nothing to delete", decl.id);
            task.handle.transition(Status::Deleted)?;
            return Ok(Action::NoChange);
        };

        let provider = self.provider(&decl.id, &record.kind)?;
        task.handle.transition(Status::Ready)?;
        task.handle.transition(Status::Deleting)?;
        self.delete(task, &provider, &record.backend_id)?;
        self.store.delete(&decl.id)?;
        task.handle.transition(Status::Deleted)?;
        Ok(Action::Deleted)
    }

    fn delete(&self, task: &mut Task<'_>, provider: &SharedProvider, backend_id: &str) -> Result<()> {
        let decl = task.decl;
        let (p, bid) = (Arc::clone(provider), backend_id.to_string());

        match self.invoke(task, Operation::Delete, move || p.delete(&bid)) {
            Ok(()) => Ok(()),
            Err(ProviderError::NotFound { .. }) => {
                log::debug!("{}: {backend_id} already gone", decl.id);
                Ok(())
            }
            Err(ProviderError::Timeout { .. }) => {
                if self.read(task, provider, backend_id)?.is_none() {
                    log::warn!("{}: delete timed out but the object is gone", decl.id);
                    Ok(())
                } else {
                    Err(Error::Timeout {
                        id: decl.id.clone(),
                        operation: Operation::Delete,
                    })
                }
            }
            Err(source) => Err(Error::Provider {
                id: decl.id.clone(),
                operation: Operation::Delete,
                source,
            }),
        }
    }

    // ========================================================================
    // Provider calls
    // ========================================================================

    /// Call the provider with retries, each attempt bounded by the timeout
    fn invoke<T, F>(&self, task: &mut Task<'_>, operation: Operation, call: F) -> ProviderResult<T>
    where
        T: Send + 'static,
        F: Fn() -> ProviderResult<T> + Send + Sync + 'static,
    {
        let call: Call<T> = Arc::new(call);
        let label = format!("{operation} {}", task.id());
        let out = with_retry(&self.options.retry, &label, || {
            self.bounded(operation, Arc::clone(&call))
        });
        task.attempts += out.attempts;
        out.result
    }

    /// Run `call` on a helper thread and stop waiting after the deadline.
    /// The call itself is not interrupted; its late result is discarded.
    fn bounded<T: Send + 'static>(&self, operation: Operation, call: Call<T>) -> ProviderResult<T> {
        let Some(timeout) = self.options.operation_timeout else {
            return call();
        };

        let (tx, rx) = mpsc::channel();
        thread::Builder::new()
            .name(format!("converge-{operation}"))
            .spawn(move || {
                // The receiver is gone if we already timed out
                let _ = tx.send(call());
            })?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(ProviderError::Timeout {
                operation,
                secs: timeout.as_secs(),
            }),
            Err(RecvTimeoutError::Disconnected) => Err(ProviderError::Other(format!(
                "{operation} call ended without a result"
            ))),
        }
    }
}
