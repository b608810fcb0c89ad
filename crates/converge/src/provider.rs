//! Provider trait and per-kind registry
//!
//! A provider translates the engine's generic create/read/diff/update/delete
//! calls into calls against one backend (a cloud API, kubectl, helm, a
//! directory on disk). Providers receive only what a call needs: the resource
//! id and spec on create, the opaque backend id afterwards.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::diff::{ChangeSet, Diff, diff_specs};
use crate::error::{Error, ProviderError, Result};
use crate::graph::DependencyGraph;
use crate::types::{BackendId, Spec};

/// Result type for provider calls.
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// Core trait for resource backends
///
/// Every call must be safe to retry:
/// - `create` must detect an object it already created for the same id and
///   return its backend id instead of creating a duplicate
/// - `delete` may return [`ProviderError::NotFound`]; the engine treats it as
///   success
///
/// # Example
///
/// ```ignore
/// use converge::{Provider, ProviderResult, ChangeSet, Spec};
///
/// #[derive(Debug)]
/// struct Namespaces { kubectl: Kubectl }
///
/// impl Provider for Namespaces {
///     fn name(&self) -> &'static str { "namespace" }
///
///     fn create(&self, id: &str, spec: &Spec) -> ProviderResult<String> {
///         let name = spec["name"].as_str().unwrap_or(id);
///         self.kubectl.apply_namespace(name)?;
///         Ok(name.to_string())
///     }
///     // read / update / delete ...
/// }
/// ```
pub trait Provider: Send + Sync + fmt::Debug {
    /// Short name shown in logs and `status` output
    fn name(&self) -> &'static str;

    /// Create the backend object for `id` and return its backend id
    fn create(&self, id: &str, spec: &Spec) -> ProviderResult<BackendId>;

    /// Observe the backend object, `None` if it does not exist
    fn read(&self, backend_id: &str) -> ProviderResult<Option<Spec>>;

    /// Compare last-applied and desired specs
    ///
    /// Default implementation compares top-level fields structurally.
    /// Override to ignore backend-populated fields. Only recorded specs are
    /// diffed; observed state is checked against a change set's own keys.
    fn diff(&self, last_applied: &Spec, desired: &Spec) -> Diff {
        diff_specs(last_applied, desired)
    }

    /// Apply a change set to an existing backend object
    fn update(&self, backend_id: &str, changes: &ChangeSet) -> ProviderResult<()>;

    /// Delete the backend object
    fn delete(&self, backend_id: &str) -> ProviderResult<()>;

    /// Find the backend object for `id` when a `create` outcome is unknown
    ///
    /// Default implementation finds nothing.
    fn locate(&self, _id: &str, _spec: &Spec) -> ProviderResult<Option<BackendId>> {
        Ok(None)
    }
}

/// A shared provider for type-erased storage
pub type SharedProvider = Arc<dyn Provider>;

/// Providers keyed by resource kind, populated once at startup
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, SharedProvider>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for `kind`
    pub fn register<P: Provider + 'static>(
        &mut self,
        kind: impl Into<String>,
        provider: P,
    ) -> Result<()> {
        self.register_shared(kind, Arc::new(provider))
    }

    /// Register an already shared provider for `kind` (one provider may
    /// serve several kinds)
    pub fn register_shared(&mut self, kind: impl Into<String>, provider: SharedProvider) -> Result<()> {
        let kind = kind.into();
        if self.providers.contains_key(&kind) {
            return Err(Error::DuplicateProvider { kind });
        }
        log::debug!("Registered provider '{}' for kind '{}'", provider.name(), kind);
        self.providers.insert(kind, provider);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<&SharedProvider> {
        self.providers.get(kind)
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.providers.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Fail if any resource in the graph has a kind with no provider
    pub fn check(&self, graph: &DependencyGraph) -> Result<()> {
        for decl in graph.declarations() {
            if !self.providers.contains_key(&decl.kind) {
                return Err(Error::UnknownKind {
                    id: decl.id.clone(),
                    kind: decl.kind.clone(),
                });
            }
        }
        Ok(())
    }
}
