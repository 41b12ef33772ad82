// Service Errors
// Error taxonomy shared by the loader, resolver, cache, step executors and orchestrator

use crate::definition::DefinitionError;
use crate::execution::graph::GraphError;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use thiserror::Error;

/// Result alias for service-level operations
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors that abort a whole operation (loading, building the graph, a run request)
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Definition(#[from] DefinitionError),

    #[error("{0}")]
    Graph(#[from] GraphError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("unknown reduction node in filter: '{0}'")]
    UnknownNode(String),
}

/// Errors raised while reading or writing cached artifacts
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("corrupt cache entry {path}: {reason}")]
    Corrupt { path: String, reason: String },
}

impl CacheError {
    pub fn corrupt(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single node failed to produce its artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionErrorKind {
    /// External command could not be launched or exited non-zero
    ExecFailed,
    /// Source artifact could not be decoded
    DecodeFailed,
    /// Filter expression could not be applied
    FilterFailed,
    /// Cancelled by timeout or by the parent run
    Cancelled,
}

impl fmt::Display for ExecutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ExecFailed => "exec failed",
            Self::DecodeFailed => "decode failed",
            Self::FilterFailed => "filter failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Error scoped to one node; never aborts sibling nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub kind: ExecutionErrorKind,
    pub message: String,
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ExecutionError {}

impl ExecutionError {
    pub fn new(kind: ExecutionErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn exec_failed(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::ExecFailed, message)
    }

    pub fn decode_failed(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::DecodeFailed, message)
    }

    pub fn filter_failed(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::FilterFailed, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ExecutionErrorKind::Cancelled, message)
    }
}
