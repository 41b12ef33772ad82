// Reduction Definition Models
// Raw node records as written in YAML/JSON, and the validated tagged form the engine runs

use crate::conclusion::Level;
use crate::steps::jq::Filter;

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

/// Step type names accepted in the `type` field
pub const STEP_TYPES: [&str; 6] = ["exec", "yaml2json", "jq", "splitlines", "chain", "analysis"];

/// Placeholders an exec command template may use
pub const EXEC_PLACEHOLDERS: [&str; 4] = ["files", "archive", "workdir", "name"];

/// A node record exactly as it appears in a definition document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawNode {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub node_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    /// Every other field; checked against the type's allowed fields
    #[serde(flatten)]
    pub fields: BTreeMap<String, serde_yaml::Value>,
}

/// `params` may be written as one string or a list of strings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum StringOrList {
    Single(String),
    List(Vec<String>),
}

impl StringOrList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            StringOrList::Single(s) => vec![s],
            StringOrList::List(v) => v,
        }
    }
}

/// A validated reduction node
#[derive(Debug, Clone, PartialEq)]
pub struct ReductionNode {
    /// Unique name; cache key and conclusion name
    pub name: String,
    /// Upstream node whose artifact is this node's input
    pub source: Option<String>,
    /// What this node does
    pub step: Step,
}

impl ReductionNode {
    pub fn type_name(&self) -> &'static str {
        self.step.type_name()
    }

    pub fn is_analysis(&self) -> bool {
        matches!(self.step, Step::Analysis(_))
    }

    pub fn analysis(&self) -> Option<&AnalysisStep> {
        match &self.step {
            Step::Analysis(analysis) => Some(analysis),
            _ => None,
        }
    }
}

/// One case per step type, validated once at load time
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Exec(ExecStep),
    Yaml2Json,
    Jq(JqStep),
    SplitLines,
    Chain(ChainStep),
    Analysis(AnalysisStep),
}

impl Step {
    pub fn type_name(&self) -> &'static str {
        match self {
            Step::Exec(_) => "exec",
            Step::Yaml2Json => "yaml2json",
            Step::Jq(_) => "jq",
            Step::SplitLines => "splitlines",
            Step::Chain(_) => "chain",
            Step::Analysis(_) => "analysis",
        }
    }

    /// Whether this step consumes an upstream artifact
    pub fn takes_input(&self) -> bool {
        match self {
            Step::Exec(_) => false,
            Step::Chain(chain) => chain.steps.first().map_or(false, Step::takes_input),
            _ => true,
        }
    }
}

/// Runs an external command against the extracted archive
#[derive(Debug, Clone, PartialEq)]
pub struct ExecStep {
    /// Command template, run through the configured shell
    pub command: String,
    /// Extra positional arguments (templates too)
    pub params: Vec<String>,
    /// Per-node timeout overriding the engine default
    pub timeout: Option<Duration>,
}

/// Applies a restricted jq-style filter
#[derive(Debug, Clone, PartialEq)]
pub struct JqStep {
    pub filter: Filter,
}

/// Ordered anonymous sub-steps piped together
#[derive(Debug, Clone, PartialEq)]
pub struct ChainStep {
    pub steps: Vec<Step>,
}

/// Wraps its input into a Conclusion
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisStep {
    pub level: Level,
    pub summary: String,
    pub description: String,
}

/// An ordered, name-indexed set of validated nodes
#[derive(Debug, Clone, Default)]
pub struct ReductionSet {
    nodes: Vec<ReductionNode>,
    indices: HashMap<String, usize>,
}

impl ReductionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node; returns the node back if the name is taken
    pub fn insert(&mut self, node: ReductionNode) -> Result<(), ReductionNode> {
        if self.indices.contains_key(&node.name) {
            return Err(node);
        }
        self.indices.insert(node.name.clone(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&ReductionNode> {
        self.indices.get(name).map(|&idx| &self.nodes[idx])
    }

    /// Declaration index of a node
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.indices.get(name).copied()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.indices.contains_key(name)
    }

    /// Nodes in declaration order
    pub fn nodes(&self) -> &[ReductionNode] {
        &self.nodes
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReductionNode> {
        self.nodes.iter()
    }

    pub fn analyses(&self) -> impl Iterator<Item = &ReductionNode> {
        self.nodes.iter().filter(|n| n.is_analysis())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
