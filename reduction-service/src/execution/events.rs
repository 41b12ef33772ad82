// Execution Events
// Progress reporting for reduction runs

use crate::conclusion::LevelCounts;
use crate::execution::run::NodeStatus;

use std::time::Duration;
use tokio::sync::mpsc;

/// Sender for execution progress events
pub type ProgressSender = mpsc::UnboundedSender<ExecutionEvent>;

/// Receiver for execution progress events
pub type ProgressReceiver = mpsc::UnboundedReceiver<ExecutionEvent>;

/// Create a new progress channel
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    mpsc::unbounded_channel()
}

/// Events emitted while reducing an archive
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// Run over one archive started
    RunStarted { archive: String, total_nodes: usize },

    /// A node missed the cache and is being executed
    NodeStarted {
        archive: String,
        node: String,
        step_type: &'static str,
    },

    /// A node finished executing
    NodeCompleted {
        archive: String,
        node: String,
        status: NodeStatus,
        duration: Duration,
    },

    /// A node was served from the cache
    NodeCached { archive: String, node: String },

    /// A node was skipped because an upstream node did not succeed
    NodeSkipped {
        archive: String,
        node: String,
        upstream: String,
    },

    /// Run over one archive completed
    RunCompleted {
        archive: String,
        counts: LevelCounts,
        failed: usize,
        duration: Duration,
    },
}

impl ExecutionEvent {
    pub fn run_started(archive: impl Into<String>, total_nodes: usize) -> Self {
        Self::RunStarted {
            archive: archive.into(),
            total_nodes,
        }
    }

    pub fn node_started(
        archive: impl Into<String>,
        node: impl Into<String>,
        step_type: &'static str,
    ) -> Self {
        Self::NodeStarted {
            archive: archive.into(),
            node: node.into(),
            step_type,
        }
    }

    pub fn node_completed(
        archive: impl Into<String>,
        node: impl Into<String>,
        status: NodeStatus,
        duration: Duration,
    ) -> Self {
        Self::NodeCompleted {
            archive: archive.into(),
            node: node.into(),
            status,
            duration,
        }
    }

    pub fn node_cached(archive: impl Into<String>, node: impl Into<String>) -> Self {
        Self::NodeCached {
            archive: archive.into(),
            node: node.into(),
        }
    }

    pub fn node_skipped(
        archive: impl Into<String>,
        node: impl Into<String>,
        upstream: impl Into<String>,
    ) -> Self {
        Self::NodeSkipped {
            archive: archive.into(),
            node: node.into(),
            upstream: upstream.into(),
        }
    }

    pub fn run_completed(
        archive: impl Into<String>,
        counts: LevelCounts,
        failed: usize,
        duration: Duration,
    ) -> Self {
        Self::RunCompleted {
            archive: archive.into(),
            counts,
            failed,
            duration,
        }
    }
}

/// Helper trait for sending events, ignoring errors (fire-and-forget)
pub trait EventSender {
    fn send_event(&self, event: ExecutionEvent);
}

impl EventSender for ProgressSender {
    fn send_event(&self, event: ExecutionEvent) {
        let _ = self.send(event);
    }
}

impl EventSender for Option<ProgressSender> {
    fn send_event(&self, event: ExecutionEvent) {
        if let Some(sender) = self {
            let _ = sender.send(event);
        }
    }
}
