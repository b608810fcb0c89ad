//! Core types for declarative provisioning

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

/// Desired or observed state of a resource: an opaque key-value mapping.
///
/// Keys are kept sorted so that diffs, hashes and serialized state are stable.
pub type Spec = BTreeMap<String, Value>;

/// Opaque handle a provider returns from `create`.
pub type BackendId = String;

/// A single declared resource, as supplied by the configuration layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Declaration {
    /// Unique identifier within a run (e.g. "tidb-cluster")
    pub id: String,
    /// Resource kind tag used to dispatch to a provider (e.g. "helm_release")
    pub kind: String,
    /// Desired state
    #[serde(default)]
    pub spec: Spec,
    /// Ids of resources that must be ready before this one is created
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl Declaration {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            spec: Spec::new(),
            depends_on: Vec::new(),
        }
    }

    /// Builder: set a single spec field
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.spec.insert(key.into(), value.into());
        self
    }

    /// Builder: add a dependency
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        if !self.depends_on.contains(&id) {
            self.depends_on.push(id);
        }
        self
    }
}

/// Lifecycle status of a resource within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Pending,
    Creating,
    Ready,
    Updating,
    Failed,
    Deleting,
    Deleted,
}

impl Status {
    /// Whether a transition from `self` to `to` is allowed.
    ///
    /// `Pending -> Ready` and `Pending -> Deleted` are refresh edges: the
    /// state store already knows the resource is live (or gone) and no
    /// backend mutation is needed to get there.
    pub fn can_transition(self, to: Status) -> bool {
        use Status::*;

        match (self, to) {
            (Pending, Creating | Ready | Deleted) => true,
            (Creating, Ready) => true,
            (Ready, Updating) | (Updating, Ready) => true,
            (Ready | Failed, Deleting) => true,
            (Deleting, Deleted) => true,
            (Failed, Pending) => true,
            (Deleted | Failed, Failed) => false,
            (_, Failed) => true,
            _ => false,
        }
    }

    /// Ready or Deleted
    pub fn is_success(self) -> bool {
        matches!(self, Self::Ready | Self::Deleted)
    }

    /// Statuses a run may end in
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::Deleted | Self::Failed)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Creating => "creating",
            Self::Ready => "ready",
            Self::Updating => "updating",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Lifecycle status of one resource during a run; the declaration it
/// converges is held alongside by the executor
#[derive(Debug, Clone)]
pub struct ResourceHandle {
    pub id: String,
    status: Status,
}

impl ResourceHandle {
    /// A fresh handle in `Pending`
    pub fn new(declaration: &Declaration) -> Self {
        Self {
            id: declaration.id.clone(),
            status: Status::Pending,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Move to `to`, rejecting edges outside the lifecycle state machine
    pub fn transition(&mut self, to: Status) -> Result<()> {
        if !self.status.can_transition(to) {
            return Err(Error::InvalidTransition {
                id: self.id.clone(),
                from: self.status,
                to,
            });
        }
        log::debug!("{}: {} -> {}", self.id, self.status, to);
        self.status = to;
        Ok(())
    }
}

/// What the engine did (or would do) to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Backend already matched the declaration
    NoChange,
    Created,
    Updated,
    Deleted,
    /// Nothing was attempted (dependency failure, cancellation, nothing recorded)
    Skipped,
    /// An operation was attempted and failed
    Failed,
}

impl Action {
    /// Whether a mutating provider call succeeded
    pub fn is_change(self) -> bool {
        matches!(self, Self::Created | Self::Updated | Self::Deleted)
    }
}

/// Fingerprint of a spec, used to spot drift between runs at a glance
pub fn spec_hash(spec: &Spec) -> String {
    // BTreeMap serialization is key-ordered, so this is canonical
    let bytes = serde_json::to_vec(spec).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn handle() -> ResourceHandle {
        ResourceHandle::new(&Declaration::new("cluster", "eks_cluster"))
    }

    #[test]
    fn test_create_path() {
        let mut h = handle();
        assert_eq!(h.id, "cluster");
        assert_eq!(h.status(), Status::Pending);
        h.transition(Status::Creating).unwrap();
        h.transition(Status::Ready).unwrap();
        h.transition(Status::Updating).unwrap();
        h.transition(Status::Ready).unwrap();
        assert_eq!(h.status(), Status::Ready);
    }

    #[test]
    fn test_teardown_path() {
        let mut h = handle();
        h.transition(Status::Ready).unwrap();
        h.transition(Status::Deleting).unwrap();
        h.transition(Status::Deleted).unwrap();
        assert!(h.transition(Status::Failed).is_err());
        assert!(h.transition(Status::Creating).is_err());
    }

    #[test]
    fn test_failed_can_retry_or_teardown() {
        assert!(Status::Failed.can_transition(Status::Pending));
        assert!(Status::Failed.can_transition(Status::Deleting));
        assert!(!Status::Failed.can_transition(Status::Ready));
    }

    #[test]
    fn test_invalid_transitions() {
        let mut h = handle();
        let err = h.transition(Status::Updating).unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        assert!(!Status::Creating.can_transition(Status::Deleting));
        assert!(!Status::Deleting.can_transition(Status::Ready));
    }

    #[test]
    fn test_any_live_state_can_fail() {
        for s in [
            Status::Pending,
            Status::Creating,
            Status::Ready,
            Status::Updating,
            Status::Deleting,
        ] {
            assert!(s.can_transition(Status::Failed), "{s} -> failed");
        }
    }

    #[test]
    fn test_spec_hash_is_order_independent() {
        let a = Declaration::new("a", "k")
            .with("x", 1)
            .with("y", json!({"b": 2, "a": 1}));
        let b = Declaration::new("a", "k")
            .with("y", json!({"a": 1, "b": 2}))
            .with("x", 1);
        assert_eq!(spec_hash(&a.spec), spec_hash(&b.spec));
        assert_ne!(spec_hash(&a.spec), spec_hash(&Spec::new()));
    }

    #[test]
    fn test_declaration_deserializes_with_defaults() {
        let decl: Declaration =
            serde_json::from_value(json!({"id": "ns", "kind": "namespace"})).unwrap();
        assert!(decl.spec.is_empty());
        assert!(decl.depends_on.is_empty());
    }
}
