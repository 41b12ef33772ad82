// Reduction Service Library
// Derives leveled conclusions from extracted sosreport archives through a graph of reduction steps

pub mod cache;
pub mod conclusion;
pub mod definition;
pub mod error;
pub mod execution;
pub mod service;
pub mod steps;
pub mod template;

// Re-export commonly used types
pub use error::{CacheError, ExecutionError, ExecutionErrorKind, ServiceError, ServiceResult};

// Re-export definition types
pub use definition::{
    DefinitionError, DefinitionErrorKind, DefinitionLoader, ReductionNode, ReductionSet, Step,
};

// Re-export conclusion types
pub use conclusion::{ArchiveSummary, Conclusion, Level, LevelCounts};

// Re-export cache types
pub use cache::{Artifact, ArtifactCache, ArtifactStatus, ArtifactValue};

// Re-export execution types
pub use execution::{
    progress_channel, Archive, ArchiveContext, EngineConfig, ExecutionEvent, GraphError,
    GraphErrorKind, NodeReport, NodeStatus, ProgressSender, ReductionGraph, ReductionRun,
    RunOptions,
};

// Re-export step types
pub use steps::{Shell, StepExecutor, StepRegistry};

pub use service::ReductionService;
