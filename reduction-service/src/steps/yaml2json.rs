// yaml2json Step
// Decodes a YAML (or JSON) blob into structured values

use crate::cache::ArtifactValue;
use crate::error::ExecutionError;

use serde::Deserialize;
use serde_json::Value;

/// Decode the source artifact
///
/// A single document becomes a `Document`, a multi-document stream a `Sequence`.
/// Already structured input passes through unchanged, except strings, which are
/// decoded as YAML text.
pub fn decode(input: &ArtifactValue) -> Result<ArtifactValue, ExecutionError> {
    match input {
        ArtifactValue::Bytes(bytes) => decode_text(&String::from_utf8_lossy(bytes)),
        ArtifactValue::Document(Value::String(text)) => decode_text(text),
        ArtifactValue::Document(value) => Ok(ArtifactValue::Document(value.clone())),
        ArtifactValue::Sequence(_) => decode_text(&input.to_text()),
        ArtifactValue::Conclusion(_) => Err(ExecutionError::decode_failed(
            "cannot decode a conclusion as YAML",
        )),
    }
}

fn decode_text(text: &str) -> Result<ArtifactValue, ExecutionError> {
    if text.trim().is_empty() {
        return Ok(ArtifactValue::Document(Value::Null));
    }

    let mut documents = Vec::new();
    for document in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(document)
            .map_err(|e| ExecutionError::decode_failed(format!("invalid YAML: {}", e)))?;
        documents.push(value);
    }

    Ok(match documents.len() {
        1 => ArtifactValue::Document(documents.remove(0)),
        _ => ArtifactValue::Sequence(documents),
    })
}
