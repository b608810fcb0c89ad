//! In-process provider
//!
//! Keeps backend objects in a map and records every call, which makes it the
//! provider of choice for tests and for trying out a manifest without touching
//! real infrastructure. Failures and latency can be injected per resource id.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crate::diff::ChangeSet;
use crate::error::{Operation, ProviderError};
use crate::provider::{Provider, ProviderResult};
use crate::types::{BackendId, Spec};

/// Number of calls per operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub create: usize,
    pub read: usize,
    pub update: usize,
    pub delete: usize,
}

impl CallCounts {
    /// Calls that may change the backend
    pub fn mutations(&self) -> usize {
        self.create + self.update + self.delete
    }
}

/// One completed call, with wall-clock bounds
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub resource_id: String,
    pub operation: Operation,
    pub started: Instant,
    pub finished: Instant,
}

#[derive(Debug, Default)]
struct Faults {
    /// Resource ids whose create/update/delete always fail
    always: Vec<String>,
    /// Remaining transient failures per resource id
    transient: HashMap<String, usize>,
    /// Sleep before committing a call
    latency: HashMap<String, Duration>,
    /// Sleep after committing a mutation (the backend did it, the reply is late)
    late_reply: HashMap<String, Duration>,
}

#[derive(Debug, Default)]
struct Backend {
    objects: BTreeMap<BackendId, Spec>,
    by_resource: HashMap<String, BackendId>,
}

/// Thread-safe in-memory backend
#[derive(Debug, Default)]
pub struct MemoryProvider {
    backend: Mutex<Backend>,
    faults: Mutex<Faults>,
    timeline: Mutex<Vec<CallRecord>>,
    creates: AtomicUsize,
    reads: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every mutating call for `resource_id` fails with a rejection
    pub fn fail_always(&self, resource_id: &str) -> &Self {
        lock(&self.faults).always.push(resource_id.to_string());
        self
    }

    /// The next `times` mutating calls for `resource_id` fail transiently
    pub fn fail_transiently(&self, resource_id: &str, times: usize) -> &Self {
        lock(&self.faults)
            .transient
            .insert(resource_id.to_string(), times);
        self
    }

    /// Calls for `resource_id` take at least `delay`
    pub fn latency(&self, resource_id: &str, delay: Duration) -> &Self {
        lock(&self.faults)
            .latency
            .insert(resource_id.to_string(), delay);
        self
    }

    /// Mutating calls for `resource_id` commit immediately but reply after `delay`
    pub fn late_reply(&self, resource_id: &str, delay: Duration) -> &Self {
        lock(&self.faults)
            .late_reply
            .insert(resource_id.to_string(), delay);
        self
    }

    /// Remove a backend object behind the engine's back
    pub fn vanish(&self, resource_id: &str) {
        let mut backend = lock(&self.backend);
        if let Some(backend_id) = backend.by_resource.remove(resource_id) {
            backend.objects.remove(&backend_id);
        }
    }

    /// Insert an object as if it had been created outside the engine
    pub fn seed(&self, resource_id: &str, spec: Spec) -> BackendId {
        let backend_id = Self::backend_id_for(resource_id);
        let mut backend = lock(&self.backend);
        backend.objects.insert(backend_id.clone(), spec);
        backend
            .by_resource
            .insert(resource_id.to_string(), backend_id.clone());
        backend_id
    }

    /// Current backend object for a resource id
    pub fn object(&self, resource_id: &str) -> Option<Spec> {
        let backend = lock(&self.backend);
        backend
            .by_resource
            .get(resource_id)
            .and_then(|b| backend.objects.get(b))
            .cloned()
    }

    /// Number of live backend objects
    pub fn len(&self) -> usize {
        lock(&self.backend).objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn calls(&self) -> CallCounts {
        CallCounts {
            create: self.creates.load(Ordering::SeqCst),
            read: self.reads.load(Ordering::SeqCst),
            update: self.updates.load(Ordering::SeqCst),
            delete: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Completed calls in completion order
    pub fn timeline(&self) -> Vec<CallRecord> {
        lock(&self.timeline).clone()
    }

    /// First call of `operation` for `resource_id`
    pub fn first_call(&self, resource_id: &str, operation: Operation) -> Option<CallRecord> {
        lock(&self.timeline)
            .iter()
            .find(|c| c.resource_id == resource_id && c.operation == operation)
            .cloned()
    }

    fn backend_id_for(resource_id: &str) -> BackendId {
        format!("mem-{resource_id}")
    }

    fn resource_for(backend_id: &str) -> &str {
        backend_id.strip_prefix("mem-").unwrap_or(backend_id)
    }

    /// Apply injected latency and failures for a mutating call
    fn inject(&self, resource_id: &str) -> ProviderResult<()> {
        let delay = lock(&self.faults).latency.get(resource_id).copied();
        if let Some(delay) = delay {
            thread::sleep(delay);
        }

        let mut faults = lock(&self.faults);
        if faults.always.iter().any(|id| id == resource_id) {
            return Err(ProviderError::rejected(format!(
                "injected failure for {resource_id}"
            )));
        }
        if let Some(remaining) = faults.transient.get_mut(resource_id)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ProviderError::transient(format!(
                "injected transient failure for {resource_id}"
            )));
        }
        Ok(())
    }

    fn reply_late(&self, resource_id: &str) {
        let late = lock(&self.faults).late_reply.get(resource_id).copied();
        if let Some(delay) = late {
            thread::sleep(delay);
        }
    }

    fn record(&self, resource_id: &str, operation: Operation, started: Instant) {
        lock(&self.timeline).push(CallRecord {
            resource_id: resource_id.to_string(),
            operation,
            started,
            finished: Instant::now(),
        });
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create(&self, id: &str, spec: &Spec) -> ProviderResult<BackendId> {
        let started = Instant::now();
        self.creates.fetch_add(1, Ordering::SeqCst);
        let result = self.inject(id).map(|()| {
            let backend_id = Self::backend_id_for(id);
            let mut backend = lock(&self.backend);
            // Creating twice for the same id converges on one object
            backend.objects.insert(backend_id.clone(), spec.clone());
            backend.by_resource.insert(id.to_string(), backend_id.clone());
            backend_id
        });

        self.reply_late(id);
        self.record(id, Operation::Create, started);
        result
    }

    fn read(&self, backend_id: &str) -> ProviderResult<Option<Spec>> {
        let started = Instant::now();
        self.reads.fetch_add(1, Ordering::SeqCst);
        let found = lock(&self.backend).objects.get(backend_id).cloned();
        self.record(Self::resource_for(backend_id), Operation::Read, started);
        Ok(found)
    }

    fn update(&self, backend_id: &str, changes: &ChangeSet) -> ProviderResult<()> {
        let started = Instant::now();
        self.updates.fetch_add(1, Ordering::SeqCst);
        let id = Self::resource_for(backend_id);
        self.inject(id)?;

        let result = {
            let mut backend = lock(&self.backend);
            match backend.objects.get_mut(backend_id) {
                Some(object) => {
                    for change in &changes.changes {
                        match &change.after {
                            Some(value) => object.insert(change.key.clone(), value.clone()),
                            None => object.remove(&change.key),
                        };
                    }
                    Ok(())
                }
                None => Err(ProviderError::NotFound {
                    backend_id: backend_id.to_string(),
                }),
            }
        };
        self.reply_late(id);
        self.record(id, Operation::Update, started);
        result
    }

    fn delete(&self, backend_id: &str) -> ProviderResult<()> {
        let started = Instant::now();
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let id = Self::resource_for(backend_id);
        self.inject(id)?;

        let removed = {
            let mut backend = lock(&self.backend);
            backend.by_resource.remove(id);
            backend.objects.remove(backend_id)
        };
        self.reply_late(id);
        self.record(id, Operation::Delete, started);

        match removed {
            Some(_) => Ok(()),
            None => Err(ProviderError::NotFound {
                backend_id: backend_id.to_string(),
            }),
        }
    }

    fn locate(&self, id: &str, _spec: &Spec) -> ProviderResult<Option<BackendId>> {
        Ok(lock(&self.backend).by_resource.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff_specs;
    use serde_json::json;

    fn spec(v: serde_json::Value) -> Spec {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_create_is_idempotent() {
        let p = MemoryProvider::new();
        let a = p.create("ns", &spec(json!({"name": "kong"}))).unwrap();
        let b = p.create("ns", &spec(json!({"name": "kong"}))).unwrap();
        assert_eq!(a, b);
        assert_eq!(p.len(), 1);
        assert_eq!(p.calls().create, 2);
    }

    #[test]
    fn test_update_applies_change_set() {
        let p = MemoryProvider::new();
        let last = spec(json!({"replicas": 1, "tag": "v2.2.1"}));
        let desired = spec(json!({"replicas": 3}));
        let id = p.create("surrealdb", &last).unwrap();

        let crate::diff::Diff::Changes(set) = diff_specs(&last, &desired) else {
            panic!("expected changes");
        };
        p.update(&id, &set).unwrap();
        assert_eq!(p.read(&id).unwrap(), Some(desired));
    }

    #[test]
    fn test_delete_missing_is_not_found() {
        let p = MemoryProvider::new();
        let err = p.delete("mem-ghost").unwrap_err();
        assert!(matches!(err, ProviderError::NotFound { .. }));
    }

    #[test]
    fn test_transient_failures_run_out() {
        let p = MemoryProvider::new();
        p.fail_transiently("ng", 2);
        assert!(p.create("ng", &Spec::new()).unwrap_err().is_retryable());
        assert!(p.create("ng", &Spec::new()).is_err());
        assert!(p.create("ng", &Spec::new()).is_ok());
    }

    #[test]
    fn test_vanish_and_locate() {
        let p = MemoryProvider::new();
        p.create("crd", &Spec::new()).unwrap();
        assert_eq!(p.locate("crd", &Spec::new()).unwrap(), Some("mem-crd".to_string()));
        p.vanish("crd");
        assert_eq!(p.read("mem-crd").unwrap(), None);
        assert_eq!(p.locate("crd", &Spec::new()).unwrap(), None);
    }
}
