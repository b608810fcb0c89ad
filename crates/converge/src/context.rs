//! Run context: progress callbacks and cancellation
//!
//! These keep the engine free of any UI: the CLI plugs a progress bar in
//! through [`ProgressCallback`] and wires Ctrl-C to a [`CancelToken`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::report::ResourceReport;

/// Which way a run walks the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Apply,
    Destroy,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Apply => write!(f, "apply"),
            Self::Destroy => write!(f, "destroy"),
        }
    }
}

/// Progress callback for execution
///
/// Resource-level methods are called from worker threads, so implementations
/// must be thread-safe.
pub trait ProgressCallback: Send + Sync {
    /// Called before a layer is dispatched
    fn on_layer_start(&self, index: usize, total: usize, ids: &[String]);

    /// Called when a worker starts converging a resource
    fn on_resource_start(&self, id: &str);

    /// Called when a resource settles
    fn on_resource_complete(&self, report: &ResourceReport);

    /// Called after every resource in the layer has settled
    fn on_layer_complete(&self, index: usize);
}

/// No-op progress callback
pub struct NoProgress;

impl ProgressCallback for NoProgress {
    fn on_layer_start(&self, _index: usize, _total: usize, _ids: &[String]) {}
    fn on_resource_start(&self, _id: &str) {}
    fn on_resource_complete(&self, _report: &ResourceReport) {}
    fn on_layer_complete(&self, _index: usize) {}
}

/// Run-scoped cancellation flag
///
/// Cancelling stops dispatch of resources that have not started; calls
/// already in flight run to completion so their outcome can be recorded.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }
}
