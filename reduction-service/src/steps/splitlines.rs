// splitlines Step
// Splits a text blob into one sequence element per line

use crate::cache::ArtifactValue;

use serde_json::Value;

/// Split the rendered text of the input on newlines
pub fn split(input: &ArtifactValue) -> ArtifactValue {
    let text = input.to_text();
    ArtifactValue::Sequence(
        text.lines()
            .map(|line| Value::String(line.to_string()))
            .collect(),
    )
}
