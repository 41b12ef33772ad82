// Step Executors
// One executor per step type, dispatched through the StepExecutor trait

pub mod analysis;
pub mod exec;
pub mod jq;
pub mod splitlines;
pub mod yaml2json;

pub use exec::Shell;

use crate::cache::ArtifactValue;
use crate::definition::Step;
use crate::error::ExecutionError;
use crate::execution::context::ArchiveContext;

/// Trait for executing one step of a node
#[async_trait::async_trait]
pub trait StepExecutor: Send + Sync {
    /// Produce the step's output from its (already resolved) input
    async fn execute(
        &self,
        node: &str,
        step: &Step,
        input: Option<&ArtifactValue>,
        ctx: &ArchiveContext,
    ) -> Result<ArtifactValue, ExecutionError>;
}

/// The built-in executors for every step type
#[derive(Debug, Clone, Copy, Default)]
pub struct StepRegistry;

impl StepRegistry {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl StepExecutor for StepRegistry {
    async fn execute(
        &self,
        node: &str,
        step: &Step,
        input: Option<&ArtifactValue>,
        ctx: &ArchiveContext,
    ) -> Result<ArtifactValue, ExecutionError> {
        match step {
            Step::Exec(exec) => exec::run(node, exec, ctx).await,
            Step::Yaml2Json => yaml2json::decode(require_input(step, input)?),
            Step::Jq(jq) => jq::run(&jq.filter, require_input(step, input)?),
            Step::SplitLines => Ok(splitlines::split(require_input(step, input)?)),
            Step::Chain(chain) => {
                // Each sub-step's output is the next one's input
                let mut current = input.cloned();
                for sub in &chain.steps {
                    let output = self.execute(node, sub, current.as_ref(), ctx).await?;
                    current = Some(output);
                }
                current.ok_or_else(|| ExecutionError::decode_failed("empty chain"))
            }
            Step::Analysis(analysis) => Ok(ArtifactValue::Conclusion(analysis::conclude(
                node,
                analysis,
                require_input(step, input)?,
            ))),
        }
    }
}

fn require_input<'a>(
    step: &Step,
    input: Option<&'a ArtifactValue>,
) -> Result<&'a ArtifactValue, ExecutionError> {
    input.ok_or_else(|| {
        ExecutionError::decode_failed(format!("{} step has no input artifact", step.type_name()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactCache;
    use crate::definition::{ChainStep, JqStep};
    use crate::execution::context::Archive;
    use crate::steps::jq::Filter;
    use serde_json::json;
    use std::sync::Arc;

    fn context() -> ArchiveContext {
        ArchiveContext::new(
            Archive::new("sos", "/nonexistent"),
            Arc::new(ArtifactCache::new("/nonexistent-cache")),
        )
    }

    fn jq(expr: &str) -> Step {
        Step::Jq(JqStep {
            filter: Filter::parse(expr).unwrap(),
        })
    }

    #[tokio::test]
    async fn test_chain_matches_manual_sequencing() {
        let registry = StepRegistry::new();
        let ctx = context();
        let source = ArtifactValue::Bytes(br#"{"lines": ["a", "b"]}"#.to_vec());

        let chain = Step::Chain(ChainStep {
            steps: vec![jq(".lines[]"), Step::SplitLines],
        });
        let chained = registry
            .execute("c", &chain, Some(&source), &ctx)
            .await
            .unwrap();

        let first = registry
            .execute("c", &jq(".lines[]"), Some(&source), &ctx)
            .await
            .unwrap();
        let manual = registry
            .execute("c", &Step::SplitLines, Some(&first), &ctx)
            .await
            .unwrap();

        assert_eq!(chained, manual);
        assert_eq!(chained, ArtifactValue::Sequence(vec![json!("a"), json!("b")]));
    }

    #[tokio::test]
    async fn test_chain_aborts_on_failing_substep() {
        let registry = StepRegistry::new();
        let chain = Step::Chain(ChainStep {
            steps: vec![jq(".[]"), Step::SplitLines],
        });
        let err = registry
            .execute("c", &chain, Some(&ArtifactValue::Document(json!(1))), &context())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ExecutionErrorKind::FilterFailed);
    }

    #[tokio::test]
    async fn test_missing_input_is_error() {
        let err = StepRegistry::new()
            .execute("x", &Step::SplitLines, None, &context())
            .await
            .unwrap_err();
        assert!(err.message.contains("splitlines"));
    }
}
