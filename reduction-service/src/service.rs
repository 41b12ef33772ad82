// Reduction Service
// Control surface: run reductions over archives and serve their conclusions

use crate::cache::ArtifactCache;
use crate::conclusion::{ArchiveSummary, Conclusion, LevelCounts};
use crate::definition::{DefinitionLoader, ReductionSet};
use crate::error::{ServiceError, ServiceResult};
use crate::execution::context::{Archive, ArchiveContext};
use crate::execution::events::ProgressSender;
use crate::execution::executor::{EngineConfig, ReductionExecutor, RunOptions};
use crate::execution::graph::ReductionGraph;
use crate::execution::run::ReductionRun;
use crate::steps::{StepExecutor, StepRegistry};

use std::path::Path;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A validated reduction set bound to an artifact cache
///
/// Cloning is cheap; clones share the definitions and the cache.
#[derive(Clone)]
pub struct ReductionService {
    config: EngineConfig,
    set: Arc<ReductionSet>,
    graph: Arc<ReductionGraph>,
    cache: Arc<ArtifactCache>,
    steps: Arc<dyn StepExecutor>,
    event_tx: Option<ProgressSender>,
}

impl ReductionService {
    /// Create a service; fails if the reduction graph is unsound
    pub fn new(set: ReductionSet, config: EngineConfig) -> ServiceResult<Self> {
        let graph = ReductionGraph::build(&set)?;
        let cache = Arc::new(ArtifactCache::new(&config.cache_dir));

        info!(
            nodes = set.len(),
            analyses = set.analyses().count(),
            cache_dir = %config.cache_dir.display(),
            "reduction service ready"
        );

        Ok(Self {
            config,
            set: Arc::new(set),
            graph: Arc::new(graph),
            cache,
            steps: Arc::new(StepRegistry::new()),
            event_tx: None,
        })
    }

    /// Load definitions from a file or directory and create a service
    pub fn from_path(path: impl AsRef<Path>, config: EngineConfig) -> ServiceResult<Self> {
        let set = DefinitionLoader::load(path)?;
        Self::new(set, config)
    }

    /// Replace the built-in step executors
    pub fn with_step_executor(mut self, steps: Arc<dyn StepExecutor>) -> Self {
        self.steps = steps;
        self
    }

    /// Set the progress event sender
    pub fn with_progress(mut self, tx: ProgressSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn definitions(&self) -> &ReductionSet {
        &self.set
    }

    pub fn graph(&self) -> &ReductionGraph {
        &self.graph
    }

    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Evaluate the reduction set against one archive
    pub async fn run(&self, archive: &Archive, options: &RunOptions) -> ServiceResult<ReductionRun> {
        self.run_with_cancel(archive, options, CancellationToken::new())
            .await
    }

    /// Like [`run`](Self::run); cancelling the token fails nodes not yet finished
    pub async fn run_with_cancel(
        &self,
        archive: &Archive,
        options: &RunOptions,
        cancel: CancellationToken,
    ) -> ServiceResult<ReductionRun> {
        let selected = self.select(options.node_filter.as_deref())?;
        let concurrency = options.concurrency.unwrap_or(self.config.concurrency);

        let ctx = ArchiveContext::new(archive.clone(), Arc::clone(&self.cache))
            .with_cancel(cancel)
            .with_exec_timeout(self.config.exec_timeout)
            .with_shell(self.config.shell);

        let executor = ReductionExecutor::new(
            Arc::clone(&self.set),
            Arc::clone(&self.graph),
            Arc::clone(&self.steps),
        )
        .with_progress(self.event_tx.clone());

        let run = executor
            .execute(&ctx, options.force, concurrency, &selected)
            .await;

        // A filtered run does not describe the whole archive
        if options.node_filter.is_none() {
            if let Err(e) = self.cache.put_conclusions(&archive.id, &run.conclusions).await {
                warn!(archive = %archive.id, error = %e, "failed to store conclusions");
            }
        }

        Ok(run)
    }

    /// Evaluate several archives, at most `concurrency` at a time
    ///
    /// Results are returned in input order; one archive's failure does not
    /// affect the others.
    pub async fn run_many(
        &self,
        archives: &[Archive],
        options: &RunOptions,
    ) -> Vec<(String, ServiceResult<ReductionRun>)> {
        let limit = options
            .concurrency
            .unwrap_or(self.config.concurrency)
            .max(1);

        let mut results: Vec<Option<ServiceResult<ReductionRun>>> =
            archives.iter().map(|_| None).collect();
        let mut pending = archives.iter().cloned().enumerate();
        let mut tasks = JoinSet::new();

        loop {
            while tasks.len() < limit {
                let Some((idx, archive)) = pending.next() else {
                    break;
                };
                let service = self.clone();
                let options = options.clone();
                tasks.spawn(async move { (idx, service.run(&archive, &options).await) });
            }

            match tasks.join_next().await {
                Some(Ok((idx, result))) => results[idx] = Some(result),
                Some(Err(e)) => warn!(error = %e, "archive run task failed to join"),
                None => break,
            }
        }

        archives
            .iter()
            .zip(results)
            .filter_map(|(archive, result)| result.map(|r| (archive.id.clone(), r)))
            .collect()
    }

    /// Conclusions stored by the last full run, if any
    pub async fn conclusions(&self, archive: &str) -> ServiceResult<Option<Vec<Conclusion>>> {
        Ok(self.cache.get_conclusions(archive).await?)
    }

    /// Per-level counts of the stored conclusions
    pub async fn summary(&self, archive: &str) -> ServiceResult<ArchiveSummary> {
        let summary = match self.cache.get_conclusions(archive).await? {
            Some(conclusions) => ArchiveSummary {
                archive: archive.to_string(),
                analysed: true,
                conclusions: LevelCounts::from_conclusions(&conclusions),
            },
            None => ArchiveSummary {
                archive: archive.to_string(),
                analysed: false,
                conclusions: LevelCounts::default(),
            },
        };
        Ok(summary)
    }

    /// Drop one node's cached artifact
    pub async fn invalidate(&self, archive: &str, node: &str) -> ServiceResult<bool> {
        if !self.set.contains(node) {
            return Err(ServiceError::UnknownNode(node.to_string()));
        }
        Ok(self.cache.invalidate(archive, node).await?)
    }

    /// Drop every cached artifact and the stored conclusions of an archive
    pub async fn clear(&self, archive: &str) -> ServiceResult<()> {
        Ok(self.cache.clear(archive).await?)
    }

    /// Names of the nodes with a completed artifact
    pub async fn list(&self, archive: &str) -> ServiceResult<Vec<String>> {
        Ok(self.cache.list(archive).await?)
    }

    fn select(&self, filter: Option<&[String]>) -> ServiceResult<Vec<bool>> {
        let Some(names) = filter else {
            return Ok(vec![true; self.graph.len()]);
        };

        let roots = names
            .iter()
            .map(|name| {
                self.graph
                    .index_of(name)
                    .ok_or_else(|| ServiceError::UnknownNode(name.clone()))
            })
            .collect::<ServiceResult<Vec<_>>>()?;

        Ok(self.graph.with_dependencies(&roots))
    }
}

impl std::fmt::Debug for ReductionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReductionService")
            .field("config", &self.config)
            .field("nodes", &self.set.len())
            .finish_non_exhaustive()
    }
}
