//! State store: the engine's durable record of what exists
//!
//! A record is written only after a provider call succeeded, so the store
//! never claims more than the backend has. The reverse can happen (a crash
//! between `create` and `put`); the next run recovers by reading the backend
//! through the cached backend id or by re-creating, relying on idempotent
//! `create`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::error::StateError;
use crate::report::RunReport;
use crate::types::{BackendId, Declaration, Spec, spec_hash};

/// Result type for state store operations.
pub type StateResult<T> = std::result::Result<T, StateError>;

/// Last-known state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub resource_id: String,
    pub kind: String,
    /// Opaque handle returned by the provider
    pub backend_id: BackendId,
    /// Spec the backend was last converged to
    pub last_applied_spec: Spec,
    /// What the provider reported after the last successful call
    #[serde(default)]
    pub last_observed_state: Option<Spec>,
    /// Dependencies at apply time, used to order teardown of orphans
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// BLAKE3 of the canonical JSON of `last_applied_spec`
    pub spec_hash: String,
    pub updated_at: DateTime<Utc>,
}

impl ProviderRecord {
    pub fn new(decl: &Declaration, backend_id: BackendId, observed: Option<Spec>) -> Self {
        Self {
            resource_id: decl.id.clone(),
            kind: decl.kind.clone(),
            backend_id,
            last_applied_spec: decl.spec.clone(),
            last_observed_state: observed,
            depends_on: decl.depends_on.clone(),
            spec_hash: spec_hash(&decl.spec),
            updated_at: Utc::now(),
        }
    }

    /// Rebuild a declaration from the record (used to tear down orphans)
    pub fn to_declaration(&self) -> Declaration {
        Declaration {
            id: self.resource_id.clone(),
            kind: self.kind.clone(),
            spec: self.last_applied_spec.clone(),
            depends_on: self.depends_on.clone(),
        }
    }
}

/// Durable keyed store of provider records
///
/// Implementations serialize access internally; the executor additionally
/// guarantees that each resource id is touched by one task per run.
pub trait StateStore: Send + Sync {
    fn get(&self, resource_id: &str) -> StateResult<Option<ProviderRecord>>;

    fn put(&self, record: ProviderRecord) -> StateResult<()>;

    fn delete(&self, resource_id: &str) -> StateResult<()>;

    /// All records, sorted by resource id
    fn list(&self) -> StateResult<Vec<ProviderRecord>>;

    /// Allocate the next run id (strictly increasing across runs)
    fn next_run_id(&self) -> StateResult<u64>;

    /// Keep the report of the most recent run
    fn save_report(&self, report: &RunReport) -> StateResult<()>;

    /// Report of the most recent run, if any
    fn last_report(&self) -> StateResult<Option<RunReport>>;
}

/// On-disk document layout
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDocument {
    #[serde(default)]
    last_run_id: u64,
    #[serde(default)]
    records: BTreeMap<String, ProviderRecord>,
    #[serde(default)]
    last_report: Option<RunReport>,
}

fn lock(m: &Mutex<StateDocument>) -> StateResult<MutexGuard<'_, StateDocument>> {
    m.lock().map_err(|_| StateError::Poisoned)
}

// ============================================================================
// Memory store
// ============================================================================

/// Non-durable store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    doc: Mutex<StateDocument>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, resource_id: &str) -> StateResult<Option<ProviderRecord>> {
        Ok(lock(&self.doc)?.records.get(resource_id).cloned())
    }

    fn put(&self, record: ProviderRecord) -> StateResult<()> {
        lock(&self.doc)?
            .records
            .insert(record.resource_id.clone(), record);
        Ok(())
    }

    fn delete(&self, resource_id: &str) -> StateResult<()> {
        lock(&self.doc)?.records.remove(resource_id);
        Ok(())
    }

    fn list(&self) -> StateResult<Vec<ProviderRecord>> {
        Ok(lock(&self.doc)?.records.values().cloned().collect())
    }

    fn next_run_id(&self) -> StateResult<u64> {
        let mut doc = lock(&self.doc)?;
        doc.last_run_id += 1;
        Ok(doc.last_run_id)
    }

    fn save_report(&self, report: &RunReport) -> StateResult<()> {
        lock(&self.doc)?.last_report = Some(report.clone());
        Ok(())
    }

    fn last_report(&self) -> StateResult<Option<RunReport>> {
        Ok(lock(&self.doc)?.last_report.clone())
    }
}

// ============================================================================
// File store
// ============================================================================

/// JSON file store
///
/// The whole document is rewritten on every change: serialized to a
/// temporary sibling, then renamed over the original, so a crash leaves either
/// the old or the new document and never a torn one.
#[derive(Debug)]
pub struct FileStateStore {
    path: PathBuf,
    doc: Mutex<StateDocument>,
}

impl FileStateStore {
    /// Open (or start) the state file at `path`
    pub fn open(path: impl AsRef<Path>) -> StateResult<Self> {
        let path = path.as_ref().to_path_buf();

        let doc = if path.exists() {
            let content = fs::read_to_string(&path).map_err(|source| StateError::Io {
                path: path.clone(),
                source,
            })?;
            let doc: StateDocument =
                serde_json::from_str(&content).map_err(|e| StateError::Corrupt {
                    path: path.clone(),
                    message: e.to_string(),
                })?;
            log::debug!(
                "Loaded state from {} ({} records)",
                path.display(),
                doc.records.len()
            );
            doc
        } else {
            log::debug!("State file {} does not exist, starting empty", path.display());
            StateDocument::default()
        };

        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `change` to a copy of the document, persist it, then commit it
    /// in memory. A failed write leaves both file and memory untouched.
    fn mutate<T>(&self, change: impl FnOnce(&mut StateDocument) -> T) -> StateResult<T> {
        let mut doc = lock(&self.doc)?;
        let mut next = doc.clone();
        let out = change(&mut next);
        self.persist(&next)?;
        *doc = next;
        Ok(out)
    }

    fn persist(&self, doc: &StateDocument) -> StateResult<()> {
        let io_err = |source| StateError::Io {
            path: self.path.clone(),
            source,
        };

        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(io_err)?;
        }

        let content = serde_json::to_vec_pretty(doc)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content).map_err(io_err)?;
        fs::rename(&tmp, &self.path).map_err(io_err)?;

        log::trace!("Saved state to {}", self.path.display());
        Ok(())
    }
}

impl StateStore for FileStateStore {
    fn get(&self, resource_id: &str) -> StateResult<Option<ProviderRecord>> {
        Ok(lock(&self.doc)?.records.get(resource_id).cloned())
    }

    fn put(&self, record: ProviderRecord) -> StateResult<()> {
        self.mutate(|doc| {
            doc.records.insert(record.resource_id.clone(), record);
        })
    }

    fn delete(&self, resource_id: &str) -> StateResult<()> {
        if lock(&self.doc)?.records.contains_key(resource_id) {
            self.mutate(|doc| {
                doc.records.remove(resource_id);
            })?;
        }
        Ok(())
    }

    fn list(&self) -> StateResult<Vec<ProviderRecord>> {
        Ok(lock(&self.doc)?.records.values().cloned().collect())
    }

    fn next_run_id(&self) -> StateResult<u64> {
        self.mutate(|doc| {
            doc.last_run_id += 1;
            doc.last_run_id
        })
    }

    fn save_report(&self, report: &RunReport) -> StateResult<()> {
        self.mutate(|doc| doc.last_report = Some(report.clone()))
    }

    fn last_report(&self) -> StateResult<Option<RunReport>> {
        Ok(lock(&self.doc)?.last_report.clone())
    }
}
