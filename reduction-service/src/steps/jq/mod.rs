// Restricted jq-style filter language
// Field access, iteration, flattening and selection over JSON values

pub mod evaluator;
pub mod lexer;
pub mod parser;

pub use evaluator::EvalError;
pub use parser::{Ast, Builtin, CompareOp, ParseFilterError};

use crate::cache::ArtifactValue;
use crate::error::ExecutionError;

use serde_json::Value;
use std::fmt;

/// Error from parsing or applying a filter
#[derive(Debug, Clone, PartialEq)]
pub enum JqError {
    Parse(ParseFilterError),
    Eval(EvalError),
}

impl fmt::Display for JqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JqError::Parse(err) => write!(f, "{}", err),
            JqError::Eval(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for JqError {}

impl From<ParseFilterError> for JqError {
    fn from(err: ParseFilterError) -> Self {
        JqError::Parse(err)
    }
}

impl From<EvalError> for JqError {
    fn from(err: EvalError) -> Self {
        JqError::Eval(err)
    }
}

/// A compiled filter
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    expression: String,
    ast: Ast,
}

impl Filter {
    pub fn parse(expression: &str) -> Result<Self, JqError> {
        let ast = parser::FilterParser::parse_str(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            ast,
        })
    }

    /// Apply to a single input value
    pub fn apply(&self, input: &Value) -> Result<Vec<Value>, JqError> {
        Ok(evaluator::evaluate(&self.ast, input)?)
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Run a jq step over an artifact, collecting every output into a sequence
///
/// Byte input is read as a stream of JSON documents, or as one JSON string
/// holding the text when it is not JSON. Sequences are filtered element-wise.
pub fn run(filter: &Filter, input: &ArtifactValue) -> Result<ArtifactValue, ExecutionError> {
    let inputs = match input {
        ArtifactValue::Bytes(bytes) => json_stream(bytes),
        ArtifactValue::Document(value) => vec![value.clone()],
        ArtifactValue::Sequence(items) => items.clone(),
        ArtifactValue::Conclusion(conclusion) => vec![serde_json::to_value(conclusion)
            .map_err(|e| ExecutionError::decode_failed(e.to_string()))?],
    };

    let mut outputs = Vec::new();
    for value in &inputs {
        let matched = filter.apply(value).map_err(|e| {
            ExecutionError::filter_failed(format!("'{}': {}", filter.expression(), e))
        })?;
        outputs.extend(matched);
    }

    Ok(ArtifactValue::Sequence(outputs))
}

fn json_stream(bytes: &[u8]) -> Vec<Value> {
    let parsed: Result<Vec<Value>, _> = serde_json::Deserializer::from_slice(bytes)
        .into_iter::<Value>()
        .collect();

    match parsed {
        Ok(values) => values,
        Err(_) => vec![Value::String(String::from_utf8_lossy(bytes).into_owned())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExecutionErrorKind;
    use serde_json::json;

    #[test]
    fn test_run_on_plain_text_bytes() {
        let filter = Filter::parse(".").unwrap();
        let out = run(&filter, &ArtifactValue::Bytes(b"a\n".to_vec())).unwrap();
        assert_eq!(out, ArtifactValue::Sequence(vec![json!("a\n")]));
    }

    #[test]
    fn test_run_on_json_stream() {
        let filter = Filter::parse(".id").unwrap();
        let bytes = b"{\"id\": 1}\n{\"id\": 2}\n".to_vec();
        let out = run(&filter, &ArtifactValue::Bytes(bytes)).unwrap();
        assert_eq!(out, ArtifactValue::Sequence(vec![json!(1), json!(2)]));
    }

    #[test]
    fn test_run_sequence_elementwise() {
        let filter = Filter::parse("select(startswith(\"k\"))").unwrap();
        let input = ArtifactValue::Sequence(vec![json!("kernel"), json!("user"), json!("kdump")]);
        let out = run(&filter, &input).unwrap();
        assert_eq!(out, ArtifactValue::Sequence(vec![json!("kernel"), json!("kdump")]));
    }

    #[test]
    fn test_empty_result_is_valid() {
        let filter = Filter::parse(".[] | select(. > 10)").unwrap();
        let out = run(&filter, &ArtifactValue::Document(json!([1, 2]))).unwrap();
        assert_eq!(out, ArtifactValue::Sequence(vec![]));
        assert!(out.is_empty());
    }

    #[test]
    fn test_eval_error_is_filter_failed() {
        let filter = Filter::parse(".[]").unwrap();
        let err = run(&filter, &ArtifactValue::Document(json!(3))).unwrap_err();
        assert_eq!(err.kind, ExecutionErrorKind::FilterFailed);
    }

    #[test]
    fn test_filter_roundtrip_expression() {
        let filter = Filter::parse(".[] | select(.ok)").unwrap();
        assert_eq!(filter.to_string(), ".[] | select(.ok)");
        assert_eq!(
            filter
                .apply(&json!([{"ok": true, "n": 1}, {"ok": false}]))
                .unwrap(),
            vec![json!({"ok": true, "n": 1})]
        );
    }

    #[test]
    fn test_errors_are_typed() {
        assert!(matches!(Filter::parse("..."), Err(JqError::Parse(_))));
        let filter = Filter::parse(".[]").unwrap();
        assert!(matches!(filter.apply(&json!(1)), Err(JqError::Eval(_))));
    }
}
