// Archive Execution Context
// Explicit per-archive state threaded through every step execution

use crate::cache::ArtifactCache;
use crate::steps::exec::Shell;
use crate::template::Template;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One extracted archive to reduce
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    /// Archive identifier; namespaces the cache
    pub id: String,
    /// Root of the extracted files
    pub files_dir: PathBuf,
}

impl Archive {
    pub fn new(id: impl Into<String>, files_dir: impl AsRef<Path>) -> Self {
        Self {
            id: id.into(),
            files_dir: files_dir.as_ref().to_path_buf(),
        }
    }
}

/// Context for evaluating nodes against one archive
#[derive(Clone)]
pub struct ArchiveContext {
    pub archive: Archive,
    /// Per-archive cache directory, exposed to commands as `{workdir}`
    pub workdir: PathBuf,
    pub cache: Arc<ArtifactCache>,
    /// Cancelled when the run is aborted
    pub cancel: CancellationToken,
    /// Default timeout for exec steps
    pub exec_timeout: Option<Duration>,
    pub shell: Shell,
}

impl ArchiveContext {
    pub fn new(archive: Archive, cache: Arc<ArtifactCache>) -> Self {
        let workdir = cache.archive_dir(&archive.id);
        Self {
            archive,
            workdir,
            cache,
            cancel: CancellationToken::new(),
            exec_timeout: None,
            shell: Shell::Default,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_exec_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.exec_timeout = timeout;
        self
    }

    pub fn with_shell(mut self, shell: Shell) -> Self {
        self.shell = shell;
        self
    }

    pub fn archive_id(&self) -> &str {
        &self.archive.id
    }

    /// Value of an exec placeholder for the given node
    pub fn placeholder(&self, token: &str, node: &str) -> Option<String> {
        match token {
            "files" => Some(self.archive.files_dir.display().to_string()),
            "archive" => Some(self.archive.id.clone()),
            "workdir" => Some(self.workdir.display().to_string()),
            "name" => Some(node.to_string()),
            _ => None,
        }
    }

    /// Render a command template for the given node
    pub fn render(&self, template: &Template, node: &str) -> String {
        template.render(|token| self.placeholder(token, node))
    }
}

impl std::fmt::Debug for ArchiveContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveContext")
            .field("archive", &self.archive)
            .field("workdir", &self.workdir)
            .field("exec_timeout", &self.exec_timeout)
            .field("shell", &self.shell)
            .finish()
    }
}
