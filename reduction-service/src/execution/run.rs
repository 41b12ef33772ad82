// Reduction Run
// Per-node terminal states and the aggregated result of one archive run

use crate::conclusion::{ArchiveSummary, Conclusion, LevelCounts};
use crate::error::ExecutionError;

use std::time::Duration;

/// Terminal state of a node within one run
#[derive(Debug, Clone, PartialEq)]
pub enum NodeStatus {
    /// Executed and produced an artifact
    Success,
    /// Executed and failed
    Failed(ExecutionError),
    /// A valid cached artifact was reused
    SkippedCached,
    /// Not attempted because `upstream` did not succeed
    SkippedUpstreamFailed { upstream: String },
}

impl NodeStatus {
    /// Whether the node has a usable artifact after the run
    pub fn is_success(&self) -> bool {
        matches!(self, NodeStatus::Success | NodeStatus::SkippedCached)
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeStatus::Success => "success",
            NodeStatus::Failed(_) => "failed",
            NodeStatus::SkippedCached => "cached",
            NodeStatus::SkippedUpstreamFailed { .. } => "upstream failed",
        }
    }
}

/// Report for one node
#[derive(Debug, Clone, PartialEq)]
pub struct NodeReport {
    pub name: String,
    pub step_type: &'static str,
    pub status: NodeStatus,
    pub duration: Duration,
}

/// Result of evaluating a reduction set against one archive
#[derive(Debug, Clone)]
pub struct ReductionRun {
    pub archive: String,
    /// Reports of every evaluated node, in evaluation order
    pub nodes: Vec<NodeReport>,
    /// One conclusion per evaluated analysis node, in declaration order
    pub conclusions: Vec<Conclusion>,
    /// Abnormal conclusions per level
    pub counts: LevelCounts,
    pub duration: Duration,
}

impl ReductionRun {
    pub fn node(&self, name: &str) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn status(&self, name: &str) -> Option<&NodeStatus> {
        self.node(name).map(|n| &n.status)
    }

    pub fn conclusion(&self, name: &str) -> Option<&Conclusion> {
        self.conclusions.iter().find(|c| c.name == name)
    }

    /// Abnormal conclusions only
    pub fn findings(&self) -> impl Iterator<Item = &Conclusion> {
        self.conclusions.iter().filter(|c| c.abnormal)
    }

    /// Number of nodes that ended `Failed`
    pub fn failed(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n.status, NodeStatus::Failed(_)))
            .count()
    }

    /// Number of nodes with a usable artifact
    pub fn succeeded(&self) -> usize {
        self.nodes.iter().filter(|n| n.status.is_success()).count()
    }

    pub fn summary(&self) -> ArchiveSummary {
        ArchiveSummary {
            archive: self.archive.clone(),
            analysed: true,
            conclusions: self.counts,
        }
    }
}
