//! Run reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::RunMode;
use crate::error::{Error, ErrorKind};
use crate::types::{Action, Status};

/// Final outcome of one resource in a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub id: String,
    pub kind: String,
    pub status: Status,
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Provider calls made, retries included
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ResourceReport {
    pub fn succeeded(id: &str, kind: &str, status: Status, action: Action) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            status,
            action,
            error: None,
            message: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn failed(id: &str, kind: &str, error: &Error) -> Self {
        let action = match error {
            Error::DependencyFailed { .. } | Error::Cancelled { .. } => Action::Skipped,
            _ => Action::Failed,
        };
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            status: Status::Failed,
            action,
            error: Some(error.kind()),
            message: Some(error.to_string()),
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status == Status::Failed
    }
}

/// Counts per action
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl RunSummary {
    /// Total number of actual changes made
    pub fn total_changes(&self) -> usize {
        self.created + self.updated + self.deleted
    }

    /// Total number of resources processed
    pub fn total(&self) -> usize {
        self.total_changes() + self.unchanged + self.skipped + self.failed
    }

    /// Add a resource outcome to the summary
    pub fn add(&mut self, report: &ResourceReport) {
        match report.action {
            Action::Created => self.created += 1,
            Action::Updated => self.updated += 1,
            Action::Deleted => self.deleted += 1,
            Action::NoChange => self.unchanged += 1,
            Action::Skipped => self.skipped += 1,
            Action::Failed => self.failed += 1,
        }
    }
}

/// Everything that happened in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: u64,
    pub mode: RunMode,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Declared resources in declaration order, then pruned orphans
    pub resources: Vec<ResourceReport>,
}

impl RunReport {
    pub fn get(&self, id: &str) -> Option<&ResourceReport> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Status of a resource, if it was part of the run
    pub fn status(&self, id: &str) -> Option<Status> {
        self.get(id).map(|r| r.status)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ResourceReport> {
        self.resources.iter().filter(|r| r.is_failed())
    }

    /// Check if every resource converged
    pub fn is_success(&self) -> bool {
        self.failed().next().is_none()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for r in &self.resources {
            summary.add(r);
        }
        summary
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(resources: Vec<ResourceReport>) -> RunReport {
        RunReport {
            run_id: 1,
            mode: RunMode::Apply,
            started_at: Utc::now(),
            finished_at: Utc::now(),
            resources,
        }
    }

    #[test]
    fn test_summary_counts() {
        let dep_failed = Error::DependencyFailed {
            id: "crd".into(),
            blocker: "ng".into(),
        };
        let r = report(vec![
            ResourceReport::succeeded("cluster", "eks_cluster", Status::Ready, Action::NoChange),
            ResourceReport::succeeded("ng", "node_group", Status::Ready, Action::Created),
            ResourceReport::failed("crd", "custom_resource", &dep_failed),
        ]);

        let summary = r.summary();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.created, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.total(), 3);
        assert!(!r.is_success());
        assert_eq!(r.get("crd").unwrap().error, Some(ErrorKind::DependencyFailed));
    }

    #[test]
    fn test_json_omits_empty_error() {
        let r = report(vec![ResourceReport::succeeded(
            "ns",
            "namespace",
            Status::Ready,
            Action::Created,
        )]);
        let json = r.to_json().unwrap();
        assert!(json.contains("\"status\": \"ready\""));
        assert!(!json.contains("\"error\""));

        let back: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}
