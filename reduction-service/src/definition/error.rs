// Definition error types
// Errors for malformed reduction definitions, with location and suggestions where known

use crate::definition::models::STEP_TYPES;

use std::fmt;
use std::path::{Path, PathBuf};

/// Error raised while loading a reduction definition set
#[derive(Debug, Clone)]
pub struct DefinitionError {
    /// Error message
    pub message: String,
    /// The kind of error
    pub kind: DefinitionErrorKind,
    /// Node the error concerns, when known
    pub node: Option<String>,
    /// File the definition came from, when loaded from disk
    pub file: Option<PathBuf>,
    /// Line number (1-indexed, 0 when unknown)
    pub line: usize,
    /// Column number (1-indexed, 0 when unknown)
    pub column: usize,
    /// Surrounding source lines
    pub context: String,
    /// Optional suggestion for fixing the error
    pub suggestion: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionErrorKind {
    /// YAML/JSON syntax error
    Syntax,
    /// Two nodes share a name
    DuplicateName,
    /// `type` is missing or not a known step type
    UnknownType,
    /// A required field is absent
    MissingField,
    /// A field is not valid for this node type
    InvalidField,
    /// A field has the wrong type or an invalid value
    InvalidValue,
    /// Definition file could not be read
    Io,
}

impl DefinitionError {
    pub fn new(kind: DefinitionErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            kind,
            node: None,
            file: None,
            line: 0,
            column: 0,
            context: String::new(),
            suggestion: None,
        }
    }

    pub fn duplicate_name(name: &str) -> Self {
        Self::new(
            DefinitionErrorKind::DuplicateName,
            format!("duplicate definition with name '{}'", name),
        )
        .with_node(name)
    }

    pub fn unknown_type(node_type: &str) -> Self {
        Self::new(
            DefinitionErrorKind::UnknownType,
            format!("type '{}' is unknown", node_type),
        )
        .with_suggestion(format!("valid types are: {}", STEP_TYPES.join(", ")))
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            DefinitionErrorKind::MissingField,
            format!("missing required field '{}'", field),
        )
    }

    pub fn invalid_field(field: &str, node_type: &str) -> Self {
        Self::new(
            DefinitionErrorKind::InvalidField,
            format!("field '{}' is not valid for type '{}'", field, node_type),
        )
    }

    pub fn invalid_value(message: impl Into<String>) -> Self {
        Self::new(DefinitionErrorKind::InvalidValue, message)
    }

    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        Self::new(
            DefinitionErrorKind::Io,
            format!("failed to read definitions: {}", err),
        )
        .with_file(path)
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_file(mut self, file: impl AsRef<Path>) -> Self {
        self.file = Some(file.as_ref().to_path_buf());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Attach a node name only if none is set yet
    pub fn or_node(self, node: Option<&str>) -> Self {
        match (&self.node, node) {
            (None, Some(name)) => self.with_node(name),
            _ => self,
        }
    }

    /// Create context from source content
    pub fn with_source_context(mut self, source: &str, context_lines: usize) -> Self {
        if self.line == 0 {
            return self;
        }

        let lines: Vec<&str> = source.lines().collect();
        let start = self.line.saturating_sub(context_lines + 1);
        let end = (self.line + context_lines).min(lines.len());

        let mut context = String::new();
        for (i, line) in lines.iter().enumerate().take(end).skip(start) {
            let line_num = i + 1;
            let prefix = if line_num == self.line { ">" } else { " " };
            context.push_str(&format!("{} {:4} | {}\n", prefix, line_num, line));

            if line_num == self.line && self.column > 0 {
                let indicator = " ".repeat(self.column + 7) + "^";
                context.push_str(&format!("       | {}\n", indicator));
            }
        }

        self.context = context;
        self
    }

    /// Create from a serde_yaml error
    pub fn from_yaml_error(err: &serde_yaml::Error, source: &str) -> Self {
        let (line, column) = err
            .location()
            .map(|loc| (loc.line(), loc.column()))
            .unwrap_or((0, 0));

        let mut error = Self::new(DefinitionErrorKind::Syntax, format_yaml_error_message(err));
        error.line = line;
        error.column = column;
        error.suggestion = suggest_yaml_fix(source, line);
        error.with_source_context(source, 2)
    }
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.node {
            Some(node) => write!(f, "definition error in '{}': {}", node, self.message)?,
            None => write!(f, "definition error: {}", self.message)?,
        }

        match (&self.file, self.line) {
            (Some(file), 0) => write!(f, "\n  --> {}", file.display())?,
            (Some(file), line) => write!(f, "\n  --> {}:{}:{}", file.display(), line, self.column)?,
            (None, 0) => {}
            (None, line) => write!(f, "\n  --> line {}:{}", line, self.column)?,
        }

        if !self.context.is_empty() {
            write!(f, "\n\n{}", self.context.trim_end())?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nhelp: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for DefinitionError {}

/// Result type for definition loading
pub type DefinitionResult<T> = Result<T, DefinitionError>;

/// Format serde_yaml error message into something more readable
fn format_yaml_error_message(err: &serde_yaml::Error) -> String {
    let msg = err.to_string();

    if msg.contains("invalid type") {
        if let (Some(expected), Some(found)) = (
            extract_between(&msg, "expected ", " at"),
            extract_between(&msg, "invalid type: ", ","),
        ) {
            return format!("expected {}, but found {}", expected, found);
        }
    }

    // Drop the trailing location, it is reported separately
    match msg.find(" at line ") {
        Some(idx) => msg[..idx].to_string(),
        None => msg,
    }
}

fn extract_between(msg: &str, prefix: &str, suffix: &str) -> Option<String> {
    let start = msg.find(prefix)? + prefix.len();
    let end = msg[start..].find(suffix)? + start;
    Some(msg[start..end].to_string())
}

/// Suggest fixes for common YAML mistakes
fn suggest_yaml_fix(source: &str, line: usize) -> Option<String> {
    let error_line = source.lines().nth(line.checked_sub(1)?)?;

    if error_line.starts_with('\t') {
        return Some(
            "YAML prefers spaces over tabs for indentation. Replace tabs with spaces.".to_string(),
        );
    }

    if error_line.contains('{') && error_line.contains(':') && !error_line.contains('"') {
        return Some(
            "braces start a YAML flow mapping; quote values that contain '{placeholders}'"
                .to_string(),
        );
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_node_and_suggestion() {
        let err = DefinitionError::unknown_type("grep").with_node("kernel-panic");
        let output = format!("{}", err);
        assert!(output.contains("'kernel-panic'"));
        assert!(output.contains("type 'grep' is unknown"));
        assert!(output.contains("help:"));
    }

    #[test]
    fn test_yaml_error_has_location() {
        let source = "- name: a\n  type: exec\n  exec: [unclosed\n";
        let yaml_err = serde_yaml::from_str::<serde_yaml::Value>(source).unwrap_err();
        let err = DefinitionError::from_yaml_error(&yaml_err, source);

        assert_eq!(err.kind, DefinitionErrorKind::Syntax);
        assert!(err.line > 0);
        assert!(err.context.contains('|'));
    }

    #[test]
    fn test_or_node_keeps_existing() {
        let err = DefinitionError::missing_field("jq").with_node("first");
        let err = err.or_node(Some("second"));
        assert_eq!(err.node.as_deref(), Some("first"));

        let err = DefinitionError::missing_field("jq").or_node(Some("second"));
        assert_eq!(err.node.as_deref(), Some("second"));
    }
}
