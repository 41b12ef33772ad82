// Analysis Step
// Wraps a source artifact into a leveled Conclusion

use crate::cache::ArtifactValue;
use crate::conclusion::{Conclusion, Detail, DetailField};
use crate::definition::AnalysisStep;
use crate::template::Template;

use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::Instant;

/// Token a flat `{path, text, ...}` record binds to
const FLAT_TOKEN: &str = "0";

/// Build the conclusion of an analysis node from its source artifact
pub fn conclude(node: &str, step: &AnalysisStep, input: &ArtifactValue) -> Conclusion {
    let started = Instant::now();

    let mut results = Vec::new();
    let mut details = Vec::new();

    match input {
        ArtifactValue::Bytes(_) => {
            results.extend(input.to_text().lines().map(str::to_string));
        }
        ArtifactValue::Document(Value::Null) => {}
        ArtifactValue::Document(Value::Array(items)) | ArtifactValue::Sequence(items) => {
            for item in items {
                collect_entry(item, &step.description, &mut results, &mut details);
            }
        }
        ArtifactValue::Document(value) => {
            collect_entry(value, &step.description, &mut results, &mut details);
        }
        ArtifactValue::Conclusion(upstream) => {
            results.extend(upstream.results.iter().cloned());
            details.extend(upstream.details.iter().cloned());
        }
    }

    let abnormal = !input.is_empty();

    Conclusion {
        name: node.to_string(),
        level: step.level,
        summary: step.summary.clone(),
        description: step.description.clone(),
        results,
        details,
        abnormal,
        normal: !abnormal,
        unknown: false,
        duration: started.elapsed().as_secs_f64(),
    }
}

fn collect_entry(
    entry: &Value,
    default_description: &str,
    results: &mut Vec<String>,
    details: &mut Vec<Detail>,
) {
    match entry {
        Value::Object(record) => match detail_from_record(record, default_description) {
            Some((text, detail)) => {
                results.push(text);
                details.push(detail);
            }
            None => results.push(entry.to_string()),
        },
        Value::String(s) => results.push(s.clone()),
        other => results.push(other.to_string()),
    }
}

/// Bind a structured record's placeholder tokens to file locations
///
/// The record's own `description` wins over the node's; an empty description
/// means `{0}`. Returns `None` when no token could be bound.
fn detail_from_record(
    record: &Map<String, Value>,
    default_description: &str,
) -> Option<(String, Detail)> {
    let description = match record.get("description").and_then(Value::as_str) {
        Some(own) if !own.is_empty() => own.to_string(),
        _ if !default_description.is_empty() => default_description.to_string(),
        _ => format!("{{{}}}", FLAT_TOKEN),
    };
    let template = Template::parse(&description).ok()?;

    let mut fields = BTreeMap::new();
    for token in template.placeholders() {
        let bound = match record.get(token).and_then(Value::as_object) {
            Some(nested) => detail_field(nested),
            None if token == FLAT_TOKEN => detail_field(record),
            None => None,
        };
        if let Some(field) = bound {
            fields.insert(token.to_string(), field);
        }
    }

    if fields.is_empty() {
        return None;
    }

    let text = template.render(|token| fields.get(token).map(|f| f.text.clone()));
    Some((
        text,
        Detail {
            description,
            fields,
        },
    ))
}

fn detail_field(record: &Map<String, Value>) -> Option<DetailField> {
    let path = record.get("path")?.as_str()?.to_string();
    let text = match record.get("text") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => return None,
    };
    let number = |key: &str| record.get(key).and_then(Value::as_u64);

    Some(DetailField {
        path,
        first_line: number("first_line"),
        last_line: number("last_line"),
        offset: number("offset"),
        length: number("length"),
        text,
    })
}
