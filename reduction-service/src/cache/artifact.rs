// Artifact Model
// The typed output of one reduction node for one archive

use crate::conclusion::Conclusion;
use crate::error::ExecutionError;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Computed output of a node
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactValue {
    /// Raw command output
    Bytes(Vec<u8>),
    /// One structured value
    Document(Value),
    /// Ordered values (jq matches, split lines)
    Sequence(Vec<Value>),
    /// Analysis output
    Conclusion(Conclusion),
}

/// How a value is laid out on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    Bytes,
    Document,
    Sequence,
    Conclusion,
}

impl ArtifactValue {
    pub fn encoding(&self) -> Encoding {
        match self {
            ArtifactValue::Bytes(_) => Encoding::Bytes,
            ArtifactValue::Document(_) => Encoding::Document,
            ArtifactValue::Sequence(_) => Encoding::Sequence,
            ArtifactValue::Conclusion(_) => Encoding::Conclusion,
        }
    }

    /// Whether the value carries no findings
    ///
    /// Whitespace-only output, `null`, empty strings/lists/objects and
    /// non-abnormal conclusions all count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            ArtifactValue::Bytes(bytes) => bytes.iter().all(u8::is_ascii_whitespace),
            ArtifactValue::Document(value) => is_empty_value(value),
            ArtifactValue::Sequence(items) => items.is_empty(),
            ArtifactValue::Conclusion(conclusion) => !conclusion.abnormal,
        }
    }

    /// Render as text: bytes as lossy UTF-8, strings raw, other values as compact JSON
    pub fn to_text(&self) -> String {
        match self {
            ArtifactValue::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            ArtifactValue::Document(value) => value_text(value),
            ArtifactValue::Sequence(items) => items
                .iter()
                .map(value_text)
                .collect::<Vec<_>>()
                .join("\n"),
            ArtifactValue::Conclusion(conclusion) => conclusion.results.join("\n"),
        }
    }

    /// Encode the payload for storage
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            ArtifactValue::Bytes(bytes) => Ok(bytes.clone()),
            ArtifactValue::Document(value) => serde_json::to_vec(value),
            ArtifactValue::Sequence(items) => serde_json::to_vec(items),
            ArtifactValue::Conclusion(conclusion) => serde_json::to_vec(conclusion),
        }
    }

    /// Decode a stored payload
    pub fn from_payload(encoding: Encoding, payload: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(match encoding {
            Encoding::Bytes => ArtifactValue::Bytes(payload.to_vec()),
            Encoding::Document => ArtifactValue::Document(serde_json::from_slice(payload)?),
            Encoding::Sequence => ArtifactValue::Sequence(serde_json::from_slice(payload)?),
            Encoding::Conclusion => ArtifactValue::Conclusion(serde_json::from_slice(payload)?),
        })
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Completion marker of an artifact
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactStatus {
    Succeeded,
    /// The node was attempted and failed
    Failed(ExecutionError),
}

/// Cached output of one node for one archive
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    pub node: String,
    pub status: ArtifactStatus,
    /// Present iff the status is `Succeeded`
    pub value: Option<ArtifactValue>,
}

impl Artifact {
    pub fn succeeded(node: impl Into<String>, value: ArtifactValue) -> Self {
        Self {
            node: node.into(),
            status: ArtifactStatus::Succeeded,
            value: Some(value),
        }
    }

    pub fn failed(node: impl Into<String>, error: ExecutionError) -> Self {
        Self {
            node: node.into(),
            status: ArtifactStatus::Failed(error),
            value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, ArtifactStatus::Succeeded)
    }

    pub fn error(&self) -> Option<&ExecutionError> {
        match &self.status {
            ArtifactStatus::Failed(err) => Some(err),
            ArtifactStatus::Succeeded => None,
        }
    }
}
