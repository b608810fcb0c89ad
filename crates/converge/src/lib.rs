//! # Converge
//!
//! An engine for declarative infrastructure provisioning.
//!
//! Callers declare resources (id, kind, spec and dependencies); the engine
//! orders them into a dependency graph, compares each one against what it
//! recorded last time and what the backend reports now, and drives the backend
//! toward the declarations through per-kind providers.
//!
//! ## Core Concepts
//!
//! - **Declaration**: desired state of one resource
//! - **DependencyGraph**: validated, acyclic graph with topological layers
//! - **Provider**: create/read/diff/update/delete for one resource kind
//! - **StateStore**: durable record of backend ids and last applied specs
//! - **Executor**: runs layers in order, resources within a layer in parallel
//! - **Controller**: one run end to end, producing a [`RunReport`]
//!
//! ## Example
//!
//! ```ignore
//! use converge::{Controller, Declaration, MemoryProvider, MemoryStateStore, ProviderRegistry};
//! use std::sync::Arc;
//!
//! let mut registry = ProviderRegistry::new();
//! registry.register("namespace", MemoryProvider::new())?;
//! registry.register("helm_release", MemoryProvider::new())?;
//!
//! let controller = Controller::new(registry, Arc::new(MemoryStateStore::new()));
//! let report = controller.apply(vec![
//!     Declaration::new("kong-ns", "namespace").with("name", "kong"),
//!     Declaration::new("kong", "helm_release")
//!         .with("chart", "kong/ingress")
//!         .depends_on("kong-ns"),
//! ])?;
//! assert!(report.is_success());
//! ```
//!
//! ## Extension Traits
//!
//! - [`Provider`]: talks to one kind of backend object
//! - [`StateStore`]: persists provider records
//! - [`ProgressCallback`]: receives progress updates
//!
//! The engine has no UI or storage dependencies of its own; the binary plugs
//! in progress bars, file-backed state and real providers.

pub mod context;
pub mod controller;
pub mod diff;
pub mod error;
pub mod executor;
pub mod graph;
pub mod memory;
pub mod plan;
pub mod provider;
pub mod report;
pub mod retry;
pub mod state;
pub mod types;

// Re-export main types at crate root
pub use context::{CancelToken, NoProgress, ProgressCallback, RunMode};
pub use controller::{Controller, RunOptions};
pub use diff::{ChangeSet, Diff, FieldChange, diff_specs};
pub use error::{Error, ErrorCategory, ErrorKind, Operation, ProviderError, Result, StateError};
pub use executor::{ExecuteOptions, Executor};
pub use graph::{DependencyGraph, Direction};
pub use memory::{CallCounts, CallRecord, MemoryProvider};
pub use plan::{Plan, PlanEntry, PlanSummary, PlannedAction};
pub use provider::{Provider, ProviderRegistry, ProviderResult, SharedProvider};
pub use report::{ResourceReport, RunReport, RunSummary};
pub use retry::{Attempted, RetryPolicy, retry_result, with_retry};
pub use state::{FileStateStore, MemoryStateStore, ProviderRecord, StateResult, StateStore};
pub use types::{Action, BackendId, Declaration, ResourceHandle, Spec, Status, spec_hash};
