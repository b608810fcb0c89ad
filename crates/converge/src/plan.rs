//! Dry-run plans

use crate::context::RunMode;
use crate::diff::ChangeSet;

/// What a run would do to one resource
#[derive(Debug, Clone, PartialEq)]
pub enum PlannedAction {
    /// No record yet
    Create,
    /// Recorded, but the backend object is gone
    Recreate,
    /// Recorded under another kind; the old object is deleted first
    Replace { from_kind: String },
    Update(ChangeSet),
    NoOp,
    /// Recorded resource to tear down (destroy, or an orphan when pruning)
    Delete,
}

impl PlannedAction {
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::NoOp)
    }

    /// Short verb for listings
    pub fn verb(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Recreate => "recreate",
            Self::Replace { .. } => "replace",
            Self::Update(_) => "update",
            Self::NoOp => "no-op",
            Self::Delete => "delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanEntry {
    pub id: String,
    pub kind: String,
    /// Execution layer, in the order the run would visit layers
    pub layer: usize,
    pub action: PlannedAction,
    /// Not declared, only present in state
    pub orphan: bool,
}

/// Counts per planned action
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl PlanSummary {
    pub fn total_changes(&self) -> usize {
        self.create + self.update + self.delete
    }
}

/// Result of a read-only pass over the declarations
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub mode: RunMode,
    /// Entries in visiting order
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn get(&self, id: &str) -> Option<&PlanEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    pub fn has_changes(&self) -> bool {
        self.entries.iter().any(|e| e.action.is_change())
    }

    pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.action.is_change())
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for entry in &self.entries {
            match entry.action {
                PlannedAction::Create | PlannedAction::Recreate | PlannedAction::Replace { .. } => {
                    summary.create += 1;
                }
                PlannedAction::Update(_) => summary.update += 1,
                PlannedAction::Delete => summary.delete += 1,
                PlannedAction::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, action: PlannedAction) -> PlanEntry {
        PlanEntry {
            id: id.into(),
            kind: "namespace".into(),
            layer: 0,
            action,
            orphan: false,
        }
    }

    #[test]
    fn test_summary() {
        let plan = Plan {
            mode: RunMode::Apply,
            entries: vec![
                entry("a", PlannedAction::Create),
                entry("b", PlannedAction::Recreate),
                entry("c", PlannedAction::NoOp),
                entry("d", PlannedAction::Delete),
            ],
        };
        let summary = plan.summary();
        assert_eq!(summary.create, 2);
        assert_eq!(summary.delete, 1);
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.total_changes(), 3);
        assert!(plan.has_changes());
        assert_eq!(plan.changes().count(), 3);
    }

    #[test]
    fn test_noop_plan_has_no_changes() {
        let plan = Plan {
            mode: RunMode::Apply,
            entries: vec![entry("a", PlannedAction::NoOp)],
        };
        assert!(!plan.has_changes());
        assert_eq!(plan.get("a").unwrap().action.verb(), "no-op");
    }
}
