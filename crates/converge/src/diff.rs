//! Diff computation between last-applied and desired specs

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Spec;

/// A single top-level field that differs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    pub key: String,
    /// Last applied value (None when the field is new)
    pub before: Option<Value>,
    /// Desired value (None when the field is removed)
    pub after: Option<Value>,
}

impl FieldChange {
    pub fn is_addition(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn is_removal(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }
}

/// The set of changes needed to move a resource to its desired spec
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<FieldChange>,
    /// Full desired spec, so providers that replace wholesale need not merge
    pub desired: Spec,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Keys touched by this change set
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().map(|c| c.key.as_str())
    }

    /// Whether `observed` carries every change. Keys outside the change set
    /// are ignored, so backend-populated fields do not count against it.
    pub fn is_reflected_in(&self, observed: &Spec) -> bool {
        self.changes
            .iter()
            .all(|change| observed.get(&change.key) == change.after.as_ref())
    }
}

/// Outcome of comparing last-applied and desired specs
#[derive(Debug, Clone, PartialEq)]
pub enum Diff {
    NoChange,
    Changes(ChangeSet),
}

impl Diff {
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Changes(_))
    }
}

/// Compare two specs key by key.
///
/// Values are compared structurally, so nested maps differing in key order
/// do not count as changes.
pub fn diff_specs(last_applied: &Spec, desired: &Spec) -> Diff {
    let mut changes = Vec::new();

    for (key, after) in desired {
        match last_applied.get(key) {
            Some(before) if before == after => {}
            before => changes.push(FieldChange {
                key: key.clone(),
                before: before.cloned(),
                after: Some(after.clone()),
            }),
        }
    }

    for (key, before) in last_applied {
        if !desired.contains_key(key) {
            changes.push(FieldChange {
                key: key.clone(),
                before: Some(before.clone()),
                after: None,
            });
        }
    }

    if changes.is_empty() {
        return Diff::NoChange;
    }

    changes.sort_by(|a, b| a.key.cmp(&b.key));
    Diff::Changes(ChangeSet {
        changes,
        desired: desired.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(v: Value) -> Spec {
        serde_json::from_value(v).unwrap()
    }

    #[test]
    fn test_identical_specs() {
        let a = spec(json!({"version": "1.27", "scaling": {"min": 1, "max": 1}}));
        assert_eq!(diff_specs(&a, &a.clone()), Diff::NoChange);
    }

    #[test]
    fn test_reflected_in_checks_only_changed_keys() {
        let last = spec(json!({"version": "1.27", "ami": "AL2"}));
        let desired = spec(json!({"version": "1.28"}));
        let Diff::Changes(set) = diff_specs(&last, &desired) else {
            panic!("expected changes");
        };

        let landed = spec(json!({"version": "1.28", "status": "ACTIVE"}));
        assert!(set.is_reflected_in(&landed));
        let stale = spec(json!({"version": "1.27"}));
        assert!(!set.is_reflected_in(&stale));
        let half = spec(json!({"version": "1.28", "ami": "AL2"}));
        assert!(!set.is_reflected_in(&half));
    }

    #[test]
    fn test_changed_added_removed() {
        let last = spec(json!({"version": "1.27", "desired_size": 1, "ami": "AL2"}));
        let desired = spec(json!({"version": "1.28", "desired_size": 1, "labels": {"dedicated": "pd"}}));

        let Diff::Changes(set) = diff_specs(&last, &desired) else {
            panic!("expected changes");
        };
        assert_eq!(set.keys().collect::<Vec<_>>(), vec!["ami", "labels", "version"]);
        assert!(set.changes[0].is_removal());
        assert!(set.changes[1].is_addition());
        assert_eq!(set.changes[2].before, Some(json!("1.27")));
        assert_eq!(set.desired, desired);
    }

    #[test]
    fn test_empty_to_something() {
        let desired = spec(json!({"name": "tidb-operator"}));
        let diff = diff_specs(&Spec::new(), &desired);
        assert!(diff.is_change());
    }
}
