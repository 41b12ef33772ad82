// Placeholder Templates
// `{token}` templates used by exec command lines and analysis descriptions

use std::fmt;

/// A piece of a parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Literal text (escapes already resolved)
    Text(String),
    /// `{token}` placeholder
    Placeholder(String),
}

/// Template syntax error
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateError {
    pub message: String,
    pub position: usize,
}

impl fmt::Display for TemplateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "template error at position {}: {}",
            self.position, self.message
        )
    }
}

impl std::error::Error for TemplateError {}

/// A parsed template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parse a template; `{{` and `}}` are literal braces
    pub fn parse(input: &str) -> Result<Self, TemplateError> {
        let chars: Vec<char> = input.chars().collect();
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut pos = 0;

        while pos < chars.len() {
            match chars[pos] {
                '{' if chars.get(pos + 1) == Some(&'{') => {
                    text.push('{');
                    pos += 2;
                }
                '}' if chars.get(pos + 1) == Some(&'}') => {
                    text.push('}');
                    pos += 2;
                }
                '{' => {
                    let start = pos;
                    let end = chars[pos + 1..]
                        .iter()
                        .position(|&c| c == '}')
                        .map(|offset| pos + 1 + offset)
                        .ok_or_else(|| TemplateError {
                            message: "unclosed '{'".to_string(),
                            position: start,
                        })?;
                    let token: String = chars[pos + 1..end].iter().collect();
                    if token.is_empty()
                        || !token.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                    {
                        return Err(TemplateError {
                            message: format!("invalid placeholder '{{{}}}'", token),
                            position: start,
                        });
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Placeholder(token));
                    pos = end + 1;
                }
                '}' => {
                    return Err(TemplateError {
                        message: "unmatched '}'".to_string(),
                        position: pos,
                    });
                }
                c => {
                    text.push(c);
                    pos += 1;
                }
            }
        }

        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Placeholder tokens in order of first appearance
    pub fn placeholders(&self) -> Vec<&str> {
        let mut tokens: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Placeholder(token) = segment {
                if !tokens.contains(&token.as_str()) {
                    tokens.push(token);
                }
            }
        }
        tokens
    }

    /// Render with a lookup; unresolved placeholders are kept as `{token}`
    pub fn render<F>(&self, mut lookup: F) -> String
    where
        F: FnMut(&str) -> Option<String>,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(token) => match lookup(token) {
                    Some(value) => out.push_str(&value),
                    None => {
                        out.push('{');
                        out.push_str(token);
                        out.push('}');
                    }
                },
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_render() {
        let template = Template::parse("ls {files}/etc -> {name}").unwrap();
        assert_eq!(template.placeholders(), vec!["files", "name"]);

        let rendered = template.render(|token| match token {
            "files" => Some("/tmp/x".to_string()),
            _ => None,
        });
        assert_eq!(rendered, "ls /tmp/x/etc -> {name}");
    }

    #[test]
    fn test_escaped_braces() {
        let template = Template::parse("awk '{{print $1}}' {files}").unwrap();
        assert_eq!(template.placeholders(), vec!["files"]);
        let rendered = template.render(|_| Some("F".to_string()));
        assert_eq!(rendered, "awk '{print $1}' F");
    }

    #[test]
    fn test_invalid_templates() {
        assert!(Template::parse("oops {").is_err());
        assert!(Template::parse("oops }").is_err());
        assert!(Template::parse("{bad token}").is_err());
        assert!(Template::parse("{}").is_err());
    }

    #[test]
    fn test_repeated_placeholder_listed_once() {
        let template = Template::parse("{0} and {0} and {1}").unwrap();
        assert_eq!(template.placeholders(), vec!["0", "1"]);
    }
}
