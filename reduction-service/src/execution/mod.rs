// Execution Engine Module
// Handles graph construction, run orchestration, and progress reporting

pub mod context;
pub mod events;
pub mod executor;
pub mod graph;
pub mod run;

// Re-export key types
pub use context::{Archive, ArchiveContext};
pub use events::{progress_channel, EventSender, ExecutionEvent, ProgressReceiver, ProgressSender};
pub use executor::{EngineConfig, ReductionExecutor, RunOptions};
pub use graph::{GraphError, GraphErrorKind, ReductionGraph};
pub use run::{NodeReport, NodeStatus, ReductionRun};
