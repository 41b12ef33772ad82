// Reduction Executor
// Evaluates the reduction graph against one archive with bounded concurrency

use crate::cache::{Artifact, ArtifactStatus, ArtifactValue};
use crate::conclusion::{Conclusion, LevelCounts};
use crate::definition::{ReductionNode, ReductionSet};
use crate::error::ExecutionError;
use crate::execution::context::ArchiveContext;
use crate::execution::events::{EventSender, ExecutionEvent, ProgressSender};
use crate::execution::graph::ReductionGraph;
use crate::execution::run::{NodeReport, NodeStatus, ReductionRun};
use crate::steps::{Shell, StepExecutor};

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Engine-wide configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root of the artifact cache (default: ~/.saucery/cache/)
    pub cache_dir: PathBuf,
    /// Maximum nodes evaluated at once; 0 is treated as 1
    pub concurrency: usize,
    /// Default timeout for exec steps (None = no timeout)
    pub exec_timeout: Option<Duration>,
    /// Shell used for exec steps
    pub shell: Shell,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cache_dir = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".saucery")
            .join("cache");

        Self {
            cache_dir,
            concurrency: 1,
            exec_timeout: None,
            shell: Shell::Default,
        }
    }
}

impl EngineConfig {
    /// Configuration with a specific cache directory
    pub fn with_cache_dir(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }
}

/// Options for a single run request
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Recompute every node, ignoring cached artifacts
    pub force: bool,
    /// Overrides the engine concurrency
    pub concurrency: Option<usize>,
    /// Evaluate only these nodes and their dependencies
    pub node_filter: Option<Vec<String>>,
}

impl RunOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn with_nodes<I, S>(mut self, nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.node_filter = Some(nodes.into_iter().map(Into::into).collect());
        self
    }
}

/// Terminal outcome of one node, with its artifact when it has one
struct NodeOutcome {
    status: NodeStatus,
    value: Option<ArtifactValue>,
    duration: Duration,
}

/// Orchestrates one archive run over a validated graph
pub struct ReductionExecutor {
    set: Arc<ReductionSet>,
    graph: Arc<ReductionGraph>,
    steps: Arc<dyn StepExecutor>,
    event_tx: Option<ProgressSender>,
}

impl ReductionExecutor {
    pub fn new(
        set: Arc<ReductionSet>,
        graph: Arc<ReductionGraph>,
        steps: Arc<dyn StepExecutor>,
    ) -> Self {
        Self {
            set,
            graph,
            steps,
            event_tx: None,
        }
    }

    /// Set the progress event sender
    pub fn with_progress(mut self, tx: Option<ProgressSender>) -> Self {
        self.event_tx = tx;
        self
    }

    /// Evaluate the selected nodes
    ///
    /// A node is started only once its source reached a terminal state. Ready
    /// nodes are taken in declaration order, so a run with `concurrency == 1`
    /// follows the graph's topological order exactly. Node failures never
    /// abort the run.
    pub async fn execute(
        &self,
        ctx: &ArchiveContext,
        force: bool,
        concurrency: usize,
        selected: &[bool],
    ) -> ReductionRun {
        let start = Instant::now();
        let archive = ctx.archive_id().to_string();
        let concurrency = concurrency.max(1);
        let total = selected.iter().filter(|s| **s).count();

        info!(archive = %archive, nodes = total, force, concurrency, "reduction run started");
        self.event_tx
            .send_event(ExecutionEvent::run_started(&archive, total));

        let mut outcomes: Vec<Option<NodeOutcome>> = (0..self.graph.len()).map(|_| None).collect();
        let mut ready: BinaryHeap<Reverse<usize>> = (0..self.graph.len())
            .filter(|&idx| selected[idx] && self.graph.source(idx).is_none())
            .map(Reverse)
            .collect();
        let mut tasks: JoinSet<(usize, NodeOutcome)> = JoinSet::new();

        loop {
            while tasks.len() < concurrency {
                let Some(Reverse(idx)) = ready.pop() else {
                    break;
                };

                let input = match self.resolve_input(idx, &outcomes) {
                    Ok(input) => input,
                    Err(upstream) => {
                        let skipped = NodeOutcome {
                            status: NodeStatus::SkippedUpstreamFailed { upstream },
                            value: None,
                            duration: Duration::ZERO,
                        };
                        self.record(idx, skipped, &archive, &mut outcomes, &mut ready, selected);
                        continue;
                    }
                };

                let set = Arc::clone(&self.set);
                let steps = Arc::clone(&self.steps);
                let ctx = ctx.clone();
                let event_tx = self.event_tx.clone();

                tasks.spawn(async move {
                    // Run on a separate task so a panicking step still reports its node
                    let work = tokio::spawn(async move {
                        let node = &set.nodes()[idx];
                        evaluate_node(node, input, &ctx, steps.as_ref(), force, &event_tx).await
                    });
                    let outcome = work.await.unwrap_or_else(|e| NodeOutcome {
                        status: NodeStatus::Failed(ExecutionError::exec_failed(format!(
                            "node task aborted: {}",
                            e
                        ))),
                        value: None,
                        duration: Duration::ZERO,
                    });
                    (idx, outcome)
                });
            }

            let Some(joined) = tasks.join_next().await else {
                break;
            };

            match joined {
                Ok((idx, outcome)) => {
                    self.record(idx, outcome, &archive, &mut outcomes, &mut ready, selected)
                }
                Err(e) => warn!(archive = %archive, error = %e, "node task failed to join"),
            }
        }

        let nodes: Vec<NodeReport> = self
            .graph
            .order()
            .iter()
            .filter_map(|&idx| {
                outcomes[idx].as_ref().map(|outcome| NodeReport {
                    name: self.graph.name(idx).to_string(),
                    step_type: self.set.nodes()[idx].type_name(),
                    status: outcome.status.clone(),
                    duration: outcome.duration,
                })
            })
            .collect();

        let conclusions = self.collect_conclusions(&outcomes);
        let counts = LevelCounts::from_conclusions(&conclusions);
        let duration = start.elapsed();
        let failed = nodes
            .iter()
            .filter(|n| matches!(n.status, NodeStatus::Failed(_)))
            .count();

        info!(
            archive = %archive,
            critical = counts.critical,
            error = counts.error,
            warning = counts.warning,
            info = counts.info,
            debug = counts.debug,
            failed,
            duration_ms = duration.as_millis() as u64,
            "reduction run completed"
        );
        self.event_tx.send_event(ExecutionEvent::run_completed(
            &archive, counts, failed, duration,
        ));

        ReductionRun {
            archive,
            nodes,
            conclusions,
            counts,
            duration,
        }
    }

    /// Input artifact of a node, or the name of the upstream that blocks it
    fn resolve_input(
        &self,
        idx: usize,
        outcomes: &[Option<NodeOutcome>],
    ) -> Result<Option<ArtifactValue>, String> {
        let Some(src) = self.graph.source(idx) else {
            return Ok(None);
        };

        match &outcomes[src] {
            Some(NodeOutcome {
                status,
                value: Some(value),
                ..
            }) if status.is_success() => Ok(Some(value.clone())),
            Some(NodeOutcome {
                status: NodeStatus::SkippedUpstreamFailed { upstream },
                ..
            }) => Err(upstream.clone()),
            _ => Err(self.graph.name(src).to_string()),
        }
    }

    fn record(
        &self,
        idx: usize,
        outcome: NodeOutcome,
        archive: &str,
        outcomes: &mut [Option<NodeOutcome>],
        ready: &mut BinaryHeap<Reverse<usize>>,
        selected: &[bool],
    ) {
        let name = self.graph.name(idx);

        match &outcome.status {
            NodeStatus::Success => {
                debug!(archive = %archive, node = %name, duration_ms = outcome.duration.as_millis() as u64, "node succeeded");
            }
            NodeStatus::Failed(error) => {
                warn!(archive = %archive, node = %name, kind = %error.kind, error = %error.message, "node failed");
            }
            NodeStatus::SkippedCached => {
                debug!(archive = %archive, node = %name, "node served from cache");
            }
            NodeStatus::SkippedUpstreamFailed { upstream } => {
                debug!(archive = %archive, node = %name, upstream = %upstream, "node skipped");
            }
        }

        let event = match &outcome.status {
            NodeStatus::SkippedCached => ExecutionEvent::node_cached(archive, name),
            NodeStatus::SkippedUpstreamFailed { upstream } => {
                ExecutionEvent::node_skipped(archive, name, upstream.as_str())
            }
            status => {
                ExecutionEvent::node_completed(archive, name, status.clone(), outcome.duration)
            }
        };
        self.event_tx.send_event(event);

        outcomes[idx] = Some(outcome);
        for &dependent in self.graph.dependents(idx) {
            if selected[dependent] {
                ready.push(Reverse(dependent));
            }
        }
    }

    /// One conclusion per analysis node; `unknown` when it produced none
    fn collect_conclusions(&self, outcomes: &[Option<NodeOutcome>]) -> Vec<Conclusion> {
        self.set
            .iter()
            .enumerate()
            .filter_map(|(idx, node)| {
                let analysis = node.analysis()?;
                let produced = outcomes[idx].as_ref().and_then(|o| match &o.value {
                    Some(ArtifactValue::Conclusion(c)) if o.status.is_success() => Some(c.clone()),
                    _ => None,
                });
                Some(produced.unwrap_or_else(|| {
                    Conclusion::unknown(
                        &node.name,
                        analysis.level,
                        &analysis.summary,
                        &analysis.description,
                    )
                }))
            })
            .collect()
    }
}

/// Evaluate one node: cache lookup, step execution, cache write
async fn evaluate_node(
    node: &ReductionNode,
    input: Option<ArtifactValue>,
    ctx: &ArchiveContext,
    steps: &dyn StepExecutor,
    force: bool,
    event_tx: &Option<ProgressSender>,
) -> NodeOutcome {
    let archive = ctx.archive_id();

    if !force {
        match ctx.cache.get(archive, &node.name).await {
            Ok(Some(Artifact {
                status: ArtifactStatus::Succeeded,
                value: Some(value),
                ..
            })) => {
                return NodeOutcome {
                    status: NodeStatus::SkippedCached,
                    value: Some(value),
                    duration: Duration::ZERO,
                };
            }
            Ok(Some(_)) => {
                debug!(archive = %archive, node = %node.name, "retrying node after cached failure");
            }
            Ok(None) => {}
            Err(e) => {
                warn!(archive = %archive, node = %node.name, error = %e, "cache read failed, recomputing");
            }
        }
    }

    event_tx.send_event(ExecutionEvent::node_started(
        archive,
        &node.name,
        node.type_name(),
    ));

    let start = Instant::now();
    let result = if ctx.cancel.is_cancelled() {
        Err(ExecutionError::cancelled("run was cancelled"))
    } else {
        steps
            .execute(&node.name, &node.step, input.as_ref(), ctx)
            .await
    };

    let artifact = match result {
        Ok(value) => Artifact::succeeded(&node.name, value),
        Err(error) => Artifact::failed(&node.name, error),
    };

    if let Err(e) = ctx.cache.put(archive, &artifact).await {
        warn!(archive = %archive, node = %node.name, error = %e, "failed to store artifact");
    }

    let duration = start.elapsed();
    match artifact.status {
        ArtifactStatus::Succeeded => NodeOutcome {
            status: NodeStatus::Success,
            value: artifact.value,
            duration,
        },
        ArtifactStatus::Failed(error) => NodeOutcome {
            status: NodeStatus::Failed(error),
            value: None,
            duration,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::definition::{DefinitionLoader, Step};
    use crate::error::ExecutionErrorKind;
    use crate::execution::context::Archive;
    use crate::execution::events::progress_channel;
    use crate::steps::StepRegistry;
    use std::sync::Mutex;

    /// Serves exec steps from a table instead of running commands
    struct FakeExec {
        outputs: Vec<(&'static str, Result<&'static str, ExecutionError>)>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl StepExecutor for FakeExec {
        async fn execute(
            &self,
            node: &str,
            step: &Step,
            input: Option<&ArtifactValue>,
            ctx: &ArchiveContext,
        ) -> Result<ArtifactValue, ExecutionError> {
            if let Step::Exec(_) = step {
                self.calls.lock().unwrap().push(node.to_string());
                let (_, output) = self
                    .outputs
                    .iter()
                    .find(|(name, _)| *name == node)
                    .expect("unexpected exec node");
                return output
                    .clone()
                    .map(|s| ArtifactValue::Bytes(s.as_bytes().to_vec()));
            }
            StepRegistry.execute(node, step, input, ctx).await
        }
    }

    const SET: &str = r#"
- {name: a, type: exec, exec: "echo a"}
- {name: b, type: jq, jq: ".", source: a}
- {name: c, type: splitlines, source: b}
- {name: d, type: analysis, source: c, level: warning, summary: found a}
- {name: e, type: exec, exec: "echo e"}
"#;

    fn executor(steps: Arc<dyn StepExecutor>) -> ReductionExecutor {
        let set = DefinitionLoader::parse(SET).unwrap();
        let graph = ReductionGraph::build(&set).unwrap();
        ReductionExecutor::new(Arc::new(set), Arc::new(graph), steps)
    }

    fn context(cache: &std::path::Path) -> ArchiveContext {
        ArchiveContext::new(
            Archive::new("sos", "/nonexistent"),
            Arc::new(ArtifactCache::new(cache)),
        )
    }

    #[tokio::test]
    async fn test_success_path_and_counts() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExec {
            outputs: vec![("a", Ok("a\n")), ("e", Ok(""))],
            calls: Mutex::new(Vec::new()),
        });

        let run = executor(fake.clone())
            .execute(&context(dir.path()), false, 1, &[true; 5])
            .await;

        assert_eq!(run.status("d"), Some(&NodeStatus::Success));
        let d = run.conclusion("d").unwrap();
        assert!(d.abnormal);
        assert_eq!(d.results, vec!["a"]);
        assert_eq!(run.counts.warning, 1);
        assert_eq!(run.counts.total(), 1);

        let names: Vec<_> = run.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c", "d", "e"]);
        assert_eq!(*fake.calls.lock().unwrap(), vec!["a", "e"]);
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExec {
            outputs: vec![
                ("a", Err(ExecutionError::exec_failed("exit status 127"))),
                ("e", Ok("e\n")),
            ],
            calls: Mutex::new(Vec::new()),
        });

        let run = executor(fake)
            .execute(&context(dir.path()), false, 1, &[true; 5])
            .await;

        assert!(matches!(
            run.status("a"),
            Some(NodeStatus::Failed(e)) if e.kind == ExecutionErrorKind::ExecFailed
        ));
        for name in ["b", "c", "d"] {
            assert_eq!(
                run.status(name),
                Some(&NodeStatus::SkippedUpstreamFailed {
                    upstream: "a".to_string()
                })
            );
        }
        assert_eq!(run.status("e"), Some(&NodeStatus::Success));
        assert_eq!(run.counts.total(), 0);
        assert!(run.conclusion("d").unwrap().unknown);
        assert_eq!(run.nodes.len(), 5);
    }

    #[tokio::test]
    async fn test_cached_artifacts_are_authoritative() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExec {
            outputs: vec![("a", Ok("a\n")), ("e", Ok("e\n"))],
            calls: Mutex::new(Vec::new()),
        });
        let executor = executor(fake.clone());

        executor
            .execute(&context(dir.path()), false, 1, &[true; 5])
            .await;
        let second = executor
            .execute(&context(dir.path()), false, 1, &[true; 5])
            .await;

        assert_eq!(fake.calls.lock().unwrap().len(), 2);
        assert!(second
            .nodes
            .iter()
            .all(|n| n.status == NodeStatus::SkippedCached));
        assert_eq!(second.counts.warning, 1);

        executor
            .execute(&context(dir.path()), true, 1, &[true; 5])
            .await;
        assert_eq!(fake.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_selection_and_events() {
        let dir = tempfile::tempdir().unwrap();
        let fake = Arc::new(FakeExec {
            outputs: vec![("a", Ok("a\n")), ("e", Ok("e\n"))],
            calls: Mutex::new(Vec::new()),
        });
        let (tx, mut rx) = progress_channel();

        let run = executor(fake.clone())
            .with_progress(Some(tx))
            .execute(&context(dir.path()), false, 4, &[true, true, false, false, false])
            .await;

        assert_eq!(run.nodes.len(), 2);
        assert!(run.conclusion("d").unwrap().unknown);
        assert_eq!(*fake.calls.lock().unwrap(), vec!["a"]);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ExecutionEvent::RunStarted { total_nodes: 2, .. })));
        assert!(matches!(events.last(), Some(ExecutionEvent::RunCompleted { failed: 0, .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ExecutionEvent::NodeCompleted { .. }))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_cached_failure_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        ctx.cache
            .put("sos", &Artifact::failed("e", ExecutionError::cancelled("timeout")))
            .await
            .unwrap();

        let fake = Arc::new(FakeExec {
            outputs: vec![("a", Ok("")), ("e", Ok("e\n"))],
            calls: Mutex::new(Vec::new()),
        });
        let run = executor(fake.clone())
            .execute(&ctx, false, 1, &[false, false, false, false, true])
            .await;

        assert_eq!(run.status("e"), Some(&NodeStatus::Success));
        assert_eq!(
            ctx.cache.get("sos", "e").await.unwrap().unwrap().value,
            Some(ArtifactValue::Bytes(b"e\n".to_vec()))
        );
    }
}
