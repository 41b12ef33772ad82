// Filter Evaluator
// Evaluates a parsed filter against a JSON value, producing a stream of outputs

use crate::steps::jq::parser::{number_value, Ast, Builtin, CompareOp};

use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Runtime error raised while applying a filter
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for EvalError {}

pub type EvalResult = Result<Vec<Value>, EvalError>;

/// Evaluate `ast` with `input` as `.`
pub fn evaluate(ast: &Ast, input: &Value) -> EvalResult {
    match ast {
        Ast::Identity => Ok(vec![input.clone()]),
        Ast::Field(name) => match input {
            Value::Object(map) => Ok(vec![map.get(name).cloned().unwrap_or(Value::Null)]),
            Value::Null => Ok(vec![Value::Null]),
            other => Err(EvalError::new(format!(
                "cannot index {} with \"{}\"",
                type_name(other),
                name
            ))),
        },
        Ast::Index(index) => match input {
            Value::Array(items) => {
                let resolved = if *index < 0 {
                    items.len() as i64 + index
                } else {
                    *index
                };
                let item = usize::try_from(resolved)
                    .ok()
                    .and_then(|i| items.get(i))
                    .cloned()
                    .unwrap_or(Value::Null);
                Ok(vec![item])
            }
            Value::Null => Ok(vec![Value::Null]),
            other => Err(EvalError::new(format!(
                "cannot index {} with number",
                type_name(other)
            ))),
        },
        Ast::Iterate => match input {
            Value::Array(items) => Ok(items.clone()),
            Value::Object(map) => Ok(map.values().cloned().collect()),
            other => Err(EvalError::new(format!(
                "cannot iterate over {}",
                type_name(other)
            ))),
        },
        Ast::Pipe(left, right) => {
            let mut out = Vec::new();
            for value in evaluate(left, input)? {
                out.extend(evaluate(right, &value)?);
            }
            Ok(out)
        }
        Ast::Comma(left, right) => {
            let mut out = evaluate(left, input)?;
            out.extend(evaluate(right, input)?);
            Ok(out)
        }
        Ast::Literal(value) => Ok(vec![value.clone()]),
        Ast::Collect(inner) => Ok(vec![Value::Array(evaluate(inner, input)?)]),
        Ast::Compare { op, left, right } => {
            let rights = evaluate(right, input)?;
            let mut out = Vec::new();
            for l in evaluate(left, input)? {
                for r in &rights {
                    out.push(Value::Bool(compare(*op, &l, r)));
                }
            }
            Ok(out)
        }
        Ast::And(left, right) => {
            let mut out = Vec::new();
            for l in evaluate(left, input)? {
                if !is_truthy(&l) {
                    out.push(Value::Bool(false));
                    continue;
                }
                for r in evaluate(right, input)? {
                    out.push(Value::Bool(is_truthy(&r)));
                }
            }
            Ok(out)
        }
        Ast::Or(left, right) => {
            let mut out = Vec::new();
            for l in evaluate(left, input)? {
                if is_truthy(&l) {
                    out.push(Value::Bool(true));
                    continue;
                }
                for r in evaluate(right, input)? {
                    out.push(Value::Bool(is_truthy(&r)));
                }
            }
            Ok(out)
        }
        Ast::Try(inner) => Ok(evaluate(inner, input).unwrap_or_default()),
        Ast::Call { builtin, args } => call(*builtin, args, input),
    }
}

fn call(builtin: Builtin, args: &[Ast], input: &Value) -> EvalResult {
    match builtin {
        Builtin::Select => {
            let mut out = Vec::new();
            for cond in evaluate(&args[0], input)? {
                if is_truthy(&cond) {
                    out.push(input.clone());
                }
            }
            Ok(out)
        }
        Builtin::Map => match input {
            Value::Array(items) => {
                let mut mapped = Vec::new();
                for item in items {
                    mapped.extend(evaluate(&args[0], item)?);
                }
                Ok(vec![Value::Array(mapped)])
            }
            other => Err(EvalError::new(format!(
                "cannot iterate over {}",
                type_name(other)
            ))),
        },
        Builtin::Flatten => {
            let depths = match args.first() {
                Some(arg) => evaluate(arg, input)?
                    .iter()
                    .map(|d| match d.as_f64() {
                        Some(d) if d >= 0.0 => Ok(d as usize),
                        _ => Err(EvalError::new("flatten depth must not be negative")),
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                None => vec![usize::MAX],
            };
            let items = match input {
                Value::Array(items) => items,
                other => {
                    return Err(EvalError::new(format!(
                        "cannot flatten {}",
                        type_name(other)
                    )))
                }
            };
            Ok(depths
                .into_iter()
                .map(|depth| {
                    let mut out = Vec::new();
                    flatten_into(items, depth, &mut out);
                    Value::Array(out)
                })
                .collect())
        }
        Builtin::Keys => match input {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                Ok(vec![Value::Array(
                    keys.into_iter().map(|k| Value::String(k.clone())).collect(),
                )])
            }
            Value::Array(items) => Ok(vec![Value::Array(
                (0..items.len()).map(|i| Value::from(i as u64)).collect(),
            )]),
            other => Err(EvalError::new(format!("{} has no keys", type_name(other)))),
        },
        Builtin::Length => {
            let length = match input {
                Value::Null => Value::from(0),
                Value::Bool(_) => {
                    return Err(EvalError::new("boolean has no length"));
                }
                Value::Number(n) => number_value(n.as_f64().unwrap_or(0.0).abs()),
                Value::String(s) => Value::from(s.chars().count() as u64),
                Value::Array(items) => Value::from(items.len() as u64),
                Value::Object(map) => Value::from(map.len() as u64),
            };
            Ok(vec![length])
        }
        Builtin::Values => Ok(if input.is_null() {
            Vec::new()
        } else {
            vec![input.clone()]
        }),
        Builtin::Empty => Ok(Vec::new()),
        Builtin::Not => Ok(vec![Value::Bool(!is_truthy(input))]),
        Builtin::ToString => Ok(vec![Value::String(to_text(input))]),
        Builtin::AsciiDowncase => {
            let s = expect_str(input, "ascii_downcase")?;
            Ok(vec![Value::String(s.to_ascii_lowercase())])
        }
        Builtin::AsciiUpcase => {
            let s = expect_str(input, "ascii_upcase")?;
            Ok(vec![Value::String(s.to_ascii_uppercase())])
        }
        Builtin::Contains => evaluate(&args[0], input)?
            .iter()
            .map(|needle| {
                if std::mem::discriminant(input) != std::mem::discriminant(needle) {
                    return Err(EvalError::new(format!(
                        "{} and {} cannot have their containment checked",
                        type_name(input),
                        type_name(needle)
                    )));
                }
                Ok(Value::Bool(contains(input, needle)))
            })
            .collect(),
        Builtin::StartsWith | Builtin::EndsWith => {
            let name = if builtin == Builtin::StartsWith {
                "startswith"
            } else {
                "endswith"
            };
            let s = expect_str(input, name)?;
            evaluate(&args[0], input)?
                .iter()
                .map(|affix| {
                    let affix = expect_str(affix, name)?;
                    let result = if builtin == Builtin::StartsWith {
                        s.starts_with(affix)
                    } else {
                        s.ends_with(affix)
                    };
                    Ok(Value::Bool(result))
                })
                .collect()
        }
        Builtin::Split => {
            let s = expect_str(input, "split")?;
            evaluate(&args[0], input)?
                .iter()
                .map(|sep| {
                    let sep = expect_str(sep, "split")?;
                    let parts: Vec<Value> = if s.is_empty() {
                        Vec::new()
                    } else {
                        s.split(sep).map(|p| Value::String(p.to_string())).collect()
                    };
                    Ok(Value::Array(parts))
                })
                .collect()
        }
        Builtin::Join => {
            let items = match input {
                Value::Array(items) => items,
                other => {
                    return Err(EvalError::new(format!("cannot join {}", type_name(other))))
                }
            };
            evaluate(&args[0], input)?
                .iter()
                .map(|sep| {
                    let sep = expect_str(sep, "join")?;
                    let parts = items
                        .iter()
                        .map(|item| match item {
                            Value::Null => Ok(String::new()),
                            Value::String(s) => Ok(s.clone()),
                            Value::Bool(_) | Value::Number(_) => Ok(item.to_string()),
                            other => Err(EvalError::new(format!(
                                "cannot join {}",
                                type_name(other)
                            ))),
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(Value::String(parts.join(sep)))
                })
                .collect()
        }
        Builtin::Test => {
            let s = expect_str(input, "test")?;
            evaluate(&args[0], input)?
                .iter()
                .map(|pattern| {
                    let pattern = expect_str(pattern, "test")?;
                    let re = Regex::new(pattern).map_err(|e| {
                        EvalError::new(format!("invalid regular expression: {}", e))
                    })?;
                    Ok(Value::Bool(re.is_match(s)))
                })
                .collect()
        }
    }
}

fn flatten_into(items: &[Value], depth: usize, out: &mut Vec<Value>) {
    for item in items {
        match item {
            Value::Array(inner) if depth > 0 => flatten_into(inner, depth - 1, out),
            other => out.push(other.clone()),
        }
    }
}

/// `false` and `null` are falsy, everything else is truthy
pub fn is_truthy(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Bool(false))
}

/// Strings as-is, everything else as compact JSON
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn expect_str<'v>(value: &'v Value, function: &str) -> Result<&'v str, EvalError> {
    value.as_str().ok_or_else(|| {
        EvalError::new(format!(
            "{} requires string input, got {}",
            function,
            type_name(value)
        ))
    })
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match (haystack, needle) {
        (Value::String(a), Value::String(b)) => a.contains(b.as_str()),
        (Value::Array(a), Value::Array(b)) => b
            .iter()
            .all(|n| a.iter().any(|h| type_matches(h, n) && contains(h, n))),
        (Value::Object(a), Value::Object(b)) => b.iter().all(|(key, n)| {
            a.get(key)
                .map(|h| type_matches(h, n) && contains(h, n))
                .unwrap_or(false)
        }),
        (a, b) => a == b,
    }
}

fn type_matches(a: &Value, b: &Value) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    let ordering = order(left, right);
    match op {
        CompareOp::Eq => ordering == Ordering::Equal,
        CompareOp::Ne => ordering != Ordering::Equal,
        CompareOp::Lt => ordering == Ordering::Less,
        CompareOp::Le => ordering != Ordering::Greater,
        CompareOp::Gt => ordering == Ordering::Greater,
        CompareOp::Ge => ordering != Ordering::Less,
    }
}

/// Total order: null < false < true < numbers < strings < arrays < objects
fn order(left: &Value, right: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(false) => 1,
            Value::Bool(true) => 2,
            Value::Number(_) => 3,
            Value::String(_) => 4,
            Value::Array(_) => 5,
            Value::Object(_) => 6,
        }
    }

    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => {
            for (x, y) in a.iter().zip(b.iter()) {
                match order(x, y) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            a.len().cmp(&b.len())
        }
        (Value::Object(a), Value::Object(b)) => {
            let mut a_keys: Vec<&String> = a.keys().collect();
            let mut b_keys: Vec<&String> = b.keys().collect();
            a_keys.sort();
            b_keys.sort();
            match a_keys.cmp(&b_keys) {
                Ordering::Equal => {}
                other => return other,
            }
            for key in a_keys {
                match (a.get(key), b.get(key)) {
                    (Some(x), Some(y)) => match order(x, y) {
                        Ordering::Equal => continue,
                        other => return other,
                    },
                    _ => continue,
                }
            }
            Ordering::Equal
        }
        (a, b) => rank(a).cmp(&rank(b)),
    }
}
