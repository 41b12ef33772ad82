// Conclusions
// Leveled findings produced by analysis nodes and their per-archive aggregates

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Severity of a conclusion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl Level {
    /// All levels, most severe first
    pub const ALL: [Level; 5] = [
        Level::Critical,
        Level::Error,
        Level::Warning,
        Level::Info,
        Level::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Critical => "critical",
            Level::Error => "error",
            Level::Warning => "warning",
            Level::Info => "info",
            Level::Debug => "debug",
        }
    }
}

impl Default for Level {
    fn default() -> Self {
        Level::Info
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Level::ALL
            .into_iter()
            .find(|level| level.as_str() == lower)
            .ok_or_else(|| format!("invalid level: '{}'", s))
    }
}

/// One file location a finding links back to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailField {
    /// Archive-relative path of the file
    pub path: String,
    /// 1-based line containing the start of the text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_line: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_line: Option<u64>,
    /// Byte offset of the text inside the file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    /// The matched text
    #[serde(default)]
    pub text: String,
}

/// A rendered result entry with the file locations its description refers to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Detail {
    /// Description template containing `{token}` placeholders
    pub description: String,
    /// Placeholder token -> bound location
    pub fields: BTreeMap<String, DetailField>,
}

/// Output of an analysis node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conclusion {
    pub name: String,
    pub level: Level,
    pub summary: String,
    pub description: String,
    /// Textual result entries
    #[serde(default)]
    pub results: Vec<String>,
    /// Structured entries that link back into archive files
    #[serde(default)]
    pub details: Vec<Detail>,
    /// Results were produced and are non-empty
    pub abnormal: bool,
    /// Results were produced and are empty
    pub normal: bool,
    /// No results could be produced
    pub unknown: bool,
    /// Seconds spent building the conclusion
    #[serde(default)]
    pub duration: f64,
}

impl Conclusion {
    /// A conclusion for an analysis that could not be evaluated
    pub fn unknown(
        name: impl Into<String>,
        level: Level,
        summary: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            level,
            summary: summary.into(),
            description: description.into(),
            results: Vec::new(),
            details: Vec::new(),
            abnormal: false,
            normal: false,
            unknown: true,
            duration: 0.0,
        }
    }
}

/// Abnormal conclusion counts per level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCounts {
    pub critical: usize,
    pub error: usize,
    pub warning: usize,
    pub info: usize,
    pub debug: usize,
}

impl LevelCounts {
    /// Count the abnormal conclusions; normal and unknown ones are ignored
    pub fn from_conclusions<'a>(conclusions: impl IntoIterator<Item = &'a Conclusion>) -> Self {
        let mut counts = Self::default();
        for conclusion in conclusions.into_iter().filter(|c| c.abnormal) {
            counts.increment(conclusion.level);
        }
        counts
    }

    pub fn increment(&mut self, level: Level) {
        *self.slot(level) += 1;
    }

    pub fn get(&self, level: Level) -> usize {
        match level {
            Level::Critical => self.critical,
            Level::Error => self.error,
            Level::Warning => self.warning,
            Level::Info => self.info,
            Level::Debug => self.debug,
        }
    }

    pub fn total(&self) -> usize {
        Level::ALL.iter().map(|level| self.get(*level)).sum()
    }

    fn slot(&mut self, level: Level) -> &mut usize {
        match level {
            Level::Critical => &mut self.critical,
            Level::Error => &mut self.error,
            Level::Warning => &mut self.warning,
            Level::Info => &mut self.info,
            Level::Debug => &mut self.debug,
        }
    }
}

/// Archive-level row for listing tables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveSummary {
    pub archive: String,
    /// A full run has completed and its conclusions are stored
    pub analysed: bool,
    pub conclusions: LevelCounts,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conclusion(name: &str, level: Level, abnormal: bool) -> Conclusion {
        Conclusion {
            name: name.to_string(),
            level,
            summary: String::new(),
            description: String::new(),
            results: if abnormal { vec!["x".to_string()] } else { vec![] },
            details: Vec::new(),
            abnormal,
            normal: !abnormal,
            unknown: false,
            duration: 0.0,
        }
    }

    #[test]
    fn test_level_parse_is_case_insensitive() {
        assert_eq!("WARNING".parse::<Level>().unwrap(), Level::Warning);
        assert_eq!(" Critical ".parse::<Level>().unwrap(), Level::Critical);
        assert!("fatal".parse::<Level>().is_err());
    }

    #[test]
    fn test_level_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Level::Error).unwrap(), "\"error\"");
        let level: Level = serde_json::from_str("\"debug\"").unwrap();
        assert_eq!(level, Level::Debug);
    }

    #[test]
    fn test_counts_only_abnormal() {
        let conclusions = vec![
            conclusion("a", Level::Warning, true),
            conclusion("b", Level::Warning, false),
            conclusion("c", Level::Critical, true),
            Conclusion::unknown("d", Level::Error, "", ""),
        ];

        let counts = LevelCounts::from_conclusions(&conclusions);
        assert_eq!(counts.warning, 1);
        assert_eq!(counts.critical, 1);
        assert_eq!(counts.error, 0);
        assert_eq!(counts.total(), 2);
    }

    #[test]
    fn test_detail_field_omits_missing_lines() {
        let field = DetailField {
            path: "var/log/messages".to_string(),
            text: "oops".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_value(&field).unwrap();
        assert!(json.get("first_line").is_none());
        assert_eq!(json["path"], "var/log/messages");
    }
}
