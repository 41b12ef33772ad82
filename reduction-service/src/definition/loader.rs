// Reduction Definition Loader
// Parses YAML/JSON reduction definitions into a validated ReductionSet

use crate::conclusion::Level;
use crate::definition::error::{DefinitionError, DefinitionErrorKind, DefinitionResult};
use crate::definition::models::*;
use crate::steps::jq::Filter;
use crate::template::Template;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A raw node together with the file it was read from
#[derive(Debug, Clone)]
struct SourcedNode {
    raw: RawNode,
    file: Option<PathBuf>,
}

/// Reduction definition loader
pub struct DefinitionLoader;

impl DefinitionLoader {
    /// Parse definitions from a YAML (or JSON) string
    pub fn parse(content: &str) -> DefinitionResult<ReductionSet> {
        let raw = Self::read_documents(content)?;
        Self::build(raw.into_iter().map(|raw| SourcedNode { raw, file: None }))
    }

    /// Parse definitions from a single file
    pub fn parse_file<P: AsRef<Path>>(path: P) -> DefinitionResult<ReductionSet> {
        let path = path.as_ref();
        let raw = Self::read_file(path)?;
        Self::build(raw.into_iter().map(|raw| SourcedNode {
            raw,
            file: Some(path.to_path_buf()),
        }))
    }

    /// Load every `*.yaml`, `*.yml` and `*.json` file below a directory
    ///
    /// Files are read in sorted path order so declaration order, and with it the
    /// evaluation order, is stable across runs. Entries resolving outside the
    /// directory (e.g. symlinks) are skipped.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> DefinitionResult<ReductionSet> {
        let dir = dir.as_ref();
        let root = dir
            .canonicalize()
            .map_err(|e| DefinitionError::io(dir, &e))?;

        let mut files = Vec::new();
        collect_definition_files(&root, &root, &mut files)?;
        files.sort();

        let mut nodes = Vec::new();
        for file in files {
            tracing::debug!(file = %file.display(), "loading reduction definitions");
            for raw in Self::read_file(&file)? {
                nodes.push(SourcedNode {
                    raw,
                    file: Some(file.clone()),
                });
            }
        }

        Self::build(nodes)
    }

    /// Load a file or a directory
    pub fn load<P: AsRef<Path>>(path: P) -> DefinitionResult<ReductionSet> {
        let path = path.as_ref();
        if path.is_dir() {
            Self::load_dir(path)
        } else {
            Self::parse_file(path)
        }
    }

    fn read_file(path: &Path) -> DefinitionResult<Vec<RawNode>> {
        let content = fs::read_to_string(path).map_err(|e| DefinitionError::io(path, &e))?;
        Self::read_documents(&content).map_err(|e| e.with_file(path))
    }

    /// Read every YAML document in the content, flattening nested lists
    fn read_documents(content: &str) -> DefinitionResult<Vec<RawNode>> {
        let mut nodes = Vec::new();
        for document in serde_yaml::Deserializer::from_str(content) {
            let value = serde_yaml::Value::deserialize(document)
                .map_err(|e| DefinitionError::from_yaml_error(&e, content))?;
            flatten_records(value, &mut nodes)?;
        }
        Ok(nodes)
    }

    fn build(nodes: impl IntoIterator<Item = SourcedNode>) -> DefinitionResult<ReductionSet> {
        let mut set = ReductionSet::new();

        for SourcedNode { raw, file } in nodes {
            let attach = |err: DefinitionError| match &file {
                Some(f) if err.file.is_none() => err.with_file(f),
                _ => err,
            };

            let node = validate_node(raw).map_err(attach)?;
            if let Err(node) = set.insert(node) {
                return Err(attach(DefinitionError::duplicate_name(&node.name)));
            }
        }

        Ok(set)
    }
}

fn collect_definition_files(
    root: &Path,
    dir: &Path,
    files: &mut Vec<PathBuf>,
) -> DefinitionResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| DefinitionError::io(dir, &e))?;

    for entry in entries {
        let entry = entry.map_err(|e| DefinitionError::io(dir, &e))?;
        let path = entry.path();

        // Skip anything resolving outside the definitions root
        let resolved = match path.canonicalize() {
            Ok(resolved) if resolved.starts_with(root) => resolved,
            _ => continue,
        };

        if resolved.is_dir() {
            collect_definition_files(root, &path, files)?;
        } else if is_definition_file(&path) {
            files.push(path);
        }
    }

    Ok(())
}

fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| matches!(ext.to_ascii_lowercase().as_str(), "yaml" | "yml" | "json"))
        .unwrap_or(false)
}

fn flatten_records(value: serde_yaml::Value, out: &mut Vec<RawNode>) -> DefinitionResult<()> {
    match value {
        serde_yaml::Value::Sequence(items) => {
            for item in items {
                flatten_records(item, out)?;
            }
            Ok(())
        }
        serde_yaml::Value::Mapping(_) => {
            let raw: RawNode = serde_yaml::from_value(value).map_err(|e| {
                DefinitionError::invalid_value(format!("invalid node record: {}", e))
            })?;
            out.push(raw);
            Ok(())
        }
        // An empty document
        serde_yaml::Value::Null => Ok(()),
        other => Err(DefinitionError::invalid_value(format!(
            "unknown definition format: {:?}",
            other
        ))),
    }
}

/// Validate one top-level record into a typed node
fn validate_node(raw: RawNode) -> DefinitionResult<ReductionNode> {
    let name = match raw.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => name.to_string(),
        _ => return Err(DefinitionError::missing_field("name")),
    };

    let node_type = raw
        .node_type
        .as_deref()
        .ok_or_else(|| DefinitionError::missing_field("type").with_node(&name))?;

    let step = build_step(node_type, raw.fields, false).map_err(|e| e.or_node(Some(&name)))?;

    let source = raw.source.filter(|s| !s.trim().is_empty());
    match (&step, &source) {
        (Step::Exec(_), Some(_)) => {
            return Err(DefinitionError::invalid_field("source", "exec").with_node(&name))
        }
        (Step::Chain(_), Some(_)) if !step.takes_input() => {
            return Err(DefinitionError::invalid_value(
                "a chain starting with an exec step cannot have a 'source'",
            )
            .with_node(&name))
        }
        (_, None) if step.takes_input() => {
            return Err(DefinitionError::missing_field("source").with_node(&name))
        }
        _ => {}
    }

    Ok(ReductionNode { name, source, step })
}

/// Build a typed step from a record's type-specific fields
fn build_step(
    node_type: &str,
    fields: BTreeMap<String, serde_yaml::Value>,
    in_chain: bool,
) -> DefinitionResult<Step> {
    let allowed: &[&str] = match node_type {
        "exec" => &["exec", "params", "timeout"],
        "yaml2json" | "splitlines" => &[],
        "jq" => &["jq"],
        "chain" => &["chain"],
        "analysis" => &["level", "summary", "description"],
        other => return Err(DefinitionError::unknown_type(other)),
    };

    if in_chain && node_type == "analysis" {
        return Err(DefinitionError::invalid_value(
            "chain entries cannot be of type 'analysis'",
        ));
    }

    if let Some(field) = fields.keys().find(|k| !allowed.contains(&k.as_str())) {
        return Err(DefinitionError::invalid_field(field, node_type));
    }

    let step = match node_type {
        "exec" => {
            let command: String = required(&fields, "exec")?;
            check_exec_template(&command, "exec")?;

            let params = optional::<StringOrList>(&fields, "params")?
                .map(StringOrList::into_vec)
                .unwrap_or_default();
            for param in &params {
                check_exec_template(param, "params")?;
            }
            if !params.is_empty() {
                crate::steps::exec::with_params(&command).map_err(|e| {
                    DefinitionError::invalid_value(format!("invalid 'exec' command: {}", e))
                })?;
            }

            let timeout = optional::<u64>(&fields, "timeout")?.map(Duration::from_secs);

            Step::Exec(ExecStep {
                command,
                params,
                timeout,
            })
        }
        "yaml2json" => Step::Yaml2Json,
        "splitlines" => Step::SplitLines,
        "jq" => {
            let expression: String = required(&fields, "jq")?;
            let filter = Filter::parse(&expression).map_err(|e| {
                DefinitionError::invalid_value(format!("invalid jq filter '{}': {}", expression, e))
            })?;
            Step::Jq(JqStep { filter })
        }
        "chain" => {
            let entries: Vec<RawNode> = required(&fields, "chain")?;
            if entries.is_empty() {
                return Err(DefinitionError::invalid_value(
                    "requires at least one chain entry",
                ));
            }

            let mut steps = Vec::with_capacity(entries.len());
            for entry in entries {
                steps.push(build_chain_entry(entry)?);
            }
            Step::Chain(ChainStep { steps })
        }
        "analysis" => {
            let level = match optional::<String>(&fields, "level")? {
                Some(level) => level
                    .parse::<Level>()
                    .map_err(DefinitionError::invalid_value)?,
                None => Level::default(),
            };
            let summary = optional::<String>(&fields, "summary")?.unwrap_or_default();
            let description = optional::<String>(&fields, "description")?.unwrap_or_default();
            Template::parse(&description).map_err(|e| {
                DefinitionError::invalid_value(format!("invalid description: {}", e))
            })?;

            Step::Analysis(AnalysisStep {
                level,
                summary,
                description,
            })
        }
        other => return Err(DefinitionError::unknown_type(other)),
    };

    Ok(step)
}

fn build_chain_entry(entry: RawNode) -> DefinitionResult<Step> {
    for (field, present) in [("name", entry.name.is_some()), ("source", entry.source.is_some())] {
        if present {
            return Err(DefinitionError::new(
                DefinitionErrorKind::InvalidField,
                format!("chain entries must not include '{}'", field),
            ));
        }
    }

    let node_type = entry
        .node_type
        .as_deref()
        .ok_or_else(|| DefinitionError::missing_field("type"))?;

    build_step(node_type, entry.fields, true)
}

fn check_exec_template(template: &str, field: &str) -> DefinitionResult<()> {
    let parsed = Template::parse(template)
        .map_err(|e| DefinitionError::invalid_value(format!("invalid '{}' template: {}", field, e)))?;

    if let Some(unknown) = parsed
        .placeholders()
        .into_iter()
        .find(|p| !EXEC_PLACEHOLDERS.contains(p))
    {
        return Err(DefinitionError::invalid_value(format!(
            "unknown placeholder '{{{}}}' in '{}'",
            unknown, field
        ))
        .with_suggestion(format!(
            "available placeholders: {}; write '{{{{' and '}}}}' for literal braces",
            EXEC_PLACEHOLDERS.join(", ")
        )));
    }

    Ok(())
}

fn required<T: DeserializeOwned>(
    fields: &BTreeMap<String, serde_yaml::Value>,
    key: &str,
) -> DefinitionResult<T> {
    optional(fields, key)?.ok_or_else(|| DefinitionError::missing_field(key))
}

fn optional<T: DeserializeOwned>(
    fields: &BTreeMap<String, serde_yaml::Value>,
    key: &str,
) -> DefinitionResult<Option<T>> {
    match fields.get(key) {
        None | Some(serde_yaml::Value::Null) => Ok(None),
        Some(value) => serde_yaml::from_value(value.clone())
            .map(Some)
            .map_err(|e| DefinitionError::invalid_value(format!("invalid '{}' field: {}", key, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_set() {
        let yaml = r#"
- name: uname
  type: exec
  exec: cat {files}/uname
- name: kernel
  type: splitlines
  source: uname
- name: kernel-check
  type: analysis
  source: kernel
  level: Warning
  summary: kernel found
"#;

        let set = DefinitionLoader::parse(yaml).unwrap();
        assert_eq!(set.len(), 3);

        let analysis = set.get("kernel-check").unwrap().analysis().unwrap();
        assert_eq!(analysis.level, Level::Warning);
        assert_eq!(analysis.summary, "kernel found");
        assert_eq!(analysis.description, "");
    }

    #[test]
    fn test_analysis_defaults_to_info() {
        let yaml = "- {name: a, type: exec, exec: 'true'}\n- {name: b, type: analysis, source: a}\n";
        let set = DefinitionLoader::parse(yaml).unwrap();
        assert_eq!(set.get("b").unwrap().analysis().unwrap().level, Level::Info);
    }

    #[test]
    fn test_duplicate_name_is_error() {
        let yaml = r#"
- {name: a, type: exec, exec: "echo 1"}
- {name: a, type: exec, exec: "echo 2"}
"#;
        let err = DefinitionLoader::parse(yaml).unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::DuplicateName);
        assert_eq!(err.node.as_deref(), Some("a"));
    }

    #[test]
    fn test_unknown_type_is_error() {
        let err = DefinitionLoader::parse("- {name: a, type: grep, source: b}").unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::UnknownType);
        assert_eq!(err.node.as_deref(), Some("a"));
        assert!(err.suggestion.as_deref().unwrap().contains("splitlines"));
    }

    #[test]
    fn test_missing_required_fields() {
        let err = DefinitionLoader::parse("- {name: a, type: exec}").unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::MissingField);
        assert!(err.message.contains("'exec'"));

        let err = DefinitionLoader::parse("- {name: a, type: analysis, level: info}").unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::MissingField);
        assert!(err.message.contains("'source'"));

        let err = DefinitionLoader::parse("- {type: splitlines, source: x}").unwrap_err();
        assert!(err.message.contains("'name'"));
    }

    #[test]
    fn test_invalid_fields_rejected() {
        let err = DefinitionLoader::parse("- {name: a, type: splitlines, source: b, jq: .}")
            .unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::InvalidField);

        let err = DefinitionLoader::parse("- {name: a, type: exec, exec: ls, source: b}")
            .unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::InvalidField);
    }

    #[test]
    fn test_invalid_level() {
        let err =
            DefinitionLoader::parse("- {name: a, type: analysis, source: b, level: fatal}")
                .unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::InvalidValue);
        assert!(err.message.contains("fatal"));
    }

    #[test]
    fn test_exec_params_and_placeholders() {
        let yaml = r#"
- name: a
  type: exec
  exec: grep -r panic
  params: "{files}/var/log"
  timeout: 30
"#;
        let set = DefinitionLoader::parse(yaml).unwrap();
        match &set.get("a").unwrap().step {
            Step::Exec(exec) => {
                assert_eq!(exec.params, vec!["{files}/var/log"]);
                assert_eq!(exec.timeout, Some(Duration::from_secs(30)));
            }
            other => panic!("unexpected step {:?}", other),
        }

        let err = DefinitionLoader::parse("- {name: a, type: exec, exec: 'ls {nope}'}")
            .unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::InvalidValue);
        assert!(err.message.contains("nope"));

        let err = DefinitionLoader::parse("- {name: a, type: exec, exec: 'sleep 1 &', params: [x]}")
            .unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::InvalidValue);
        assert!(err.message.contains("'&'"));
    }

    #[test]
    fn test_chain_entries() {
        let yaml = r#"
- {name: src, type: exec, exec: "echo '{{}}'"}
- name: c
  type: chain
  source: src
  chain:
    - {type: jq, jq: ".[]"}
    - {type: splitlines}
"#;
        let set = DefinitionLoader::parse(yaml).unwrap();
        match &set.get("c").unwrap().step {
            Step::Chain(chain) => {
                assert_eq!(chain.steps.len(), 2);
                assert_eq!(chain.steps[1], Step::SplitLines);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[test]
    fn test_chain_entry_restrictions() {
        let named = r#"
- name: c
  type: chain
  source: x
  chain:
    - {name: inner, type: splitlines}
"#;
        let err = DefinitionLoader::parse(named).unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::InvalidField);
        assert_eq!(err.node.as_deref(), Some("c"));

        let empty = "- {name: c, type: chain, source: x, chain: []}";
        let err = DefinitionLoader::parse(empty).unwrap_err();
        assert!(err.message.contains("at least one"));

        let analysis = r#"
- name: c
  type: chain
  source: x
  chain:
    - {type: analysis}
"#;
        assert!(DefinitionLoader::parse(analysis).is_err());
    }

    #[test]
    fn test_bad_jq_filter_rejected_at_load() {
        let err = DefinitionLoader::parse("- {name: a, type: jq, source: b, jq: '.['}")
            .unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::InvalidValue);
    }

    #[test]
    fn test_nested_lists_and_multiple_documents() {
        let yaml = "- - {name: a, type: exec, exec: 'true'}\n---\n{name: b, type: splitlines, source: a}\n";
        let set = DefinitionLoader::parse(yaml).unwrap();
        let names: Vec<_> = set.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_json_definitions() {
        let json = r#"[{"name": "a", "type": "exec", "exec": "uptime"}]"#;
        let set = DefinitionLoader::parse(json).unwrap();
        assert!(set.contains("a"));
    }

    #[test]
    fn test_load_dir_sorted_and_duplicates_across_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(
            dir.path().join("b.yaml"),
            "- {name: second, type: splitlines, source: first}\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("a.json"),
            r#"[{"name": "first", "type": "exec", "exec": "true"}]"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("nested").join("c.YML"),
            "- {name: third, type: analysis, source: second}\n",
        )
        .unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let set = DefinitionLoader::load_dir(dir.path()).unwrap();
        let names: Vec<_> = set.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);

        fs::write(
            dir.path().join("z.yaml"),
            "- {name: first, type: exec, exec: 'false'}\n",
        )
        .unwrap();
        let err = DefinitionLoader::load_dir(dir.path()).unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::DuplicateName);
        assert!(err.file.unwrap().ends_with("z.yaml"));
    }

    #[test]
    fn test_syntax_error_reports_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "- name: a\n  type: [exec\n").unwrap();

        let err = DefinitionLoader::parse_file(&path).unwrap_err();
        assert_eq!(err.kind, DefinitionErrorKind::Syntax);
        assert_eq!(err.file.as_deref(), Some(path.as_path()));
    }
}
