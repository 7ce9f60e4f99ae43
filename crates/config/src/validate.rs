//! Configuration validation.
//!
//! Validates TOML configuration against the known schema, detects
//! unknown/misspelled fields, and reports settings that silently disable
//! behaviour (e.g. an accumulator that can hold nothing).

use std::path::{Path, PathBuf};

use crate::schema::CatmanduConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "limits", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "accumulator.max_mesages"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

/// Known keys per section. Top-level keys map to their field lists.
const SCHEMA: &[(&str, &[&str])] = &[
    ("accumulator", &[
        "max_messages",
        "max_message_length",
        "feedback_enabled",
    ]),
    ("handlers", &["dir", "manifest_name"]),
    ("retry", &["backoff_base_ms"]),
    ("chat_log", &["enabled", "dir"]),
];

fn levenshtein(a: &str, b: &str) -> usize {
    let b_chars: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b_chars.len()).collect();
    let mut curr = vec![0; b_chars.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b_chars.iter().enumerate() {
            let cost = usize::from(ca != *cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_chars.len()]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| (*c, levenshtein(needle, c)))
        .filter(|(_, d)| *d <= max_distance)
        .min_by_key(|(_, d)| *d)
        .map(|(c, _)| c)
}

/// Validate a config file at the given path, or the discovered default
/// location when `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    match std::fs::read_to_string(&actual_path) {
        Ok(content) => {
            let mut result = validate_toml_str(&content);
            result.config_path = Some(actual_path);
            result
        },
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: Some(actual_path),
        },
    }
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&value, &mut diagnostics);

    match toml::from_str::<CatmanduConfig>(toml_str) {
        Ok(config) => check_semantic_warnings(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(value: &toml::Value, diagnostics: &mut Vec<Diagnostic>) {
    let Some(table) = value.as_table() else {
        return;
    };
    let sections: Vec<&str> = SCHEMA.iter().map(|(name, _)| *name).collect();

    for (key, child) in table {
        let Some((_, fields)) = SCHEMA.iter().find(|(name, _)| *name == key.as_str()) else {
            diagnostics.push(unknown_field(key.clone(), suggest(key, &sections, 3), true));
            continue;
        };
        let Some(child_table) = child.as_table() else {
            continue;
        };
        for field in child_table.keys() {
            if !fields.contains(&field.as_str()) {
                diagnostics.push(unknown_field(
                    format!("{key}.{field}"),
                    suggest(field, fields, 3),
                    false,
                ));
            }
        }
    }
}

fn unknown_field(path: String, suggestion: Option<&str>, top_level: bool) -> Diagnostic {
    let level = if top_level {
        " at top level"
    } else {
        ""
    };
    let message = match suggestion {
        Some(s) => format!("unknown field{level} (did you mean \"{s}\"?)"),
        None => format!("unknown field{level}"),
    };
    Diagnostic {
        severity: Severity::Error,
        category: "unknown-field",
        path,
        message,
    }
}

fn check_semantic_warnings(config: &CatmanduConfig, diagnostics: &mut Vec<Diagnostic>) {
    if config.accumulator.max_messages == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "limits",
            path: "accumulator.max_messages".into(),
            message: "max_messages is 0; plain messages will never be retained".into(),
        });
    }

    if config.accumulator.max_message_length == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "limits",
            path: "accumulator.max_message_length".into(),
            message: "max_message_length is 0; plain messages will never be retained".into(),
        });
    }

    if config.handlers.manifest_name.trim().is_empty() {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "file-ref",
            path: "handlers.manifest_name".into(),
            message: "manifest_name must not be empty".into(),
        });
    }

    if config.retry.backoff_base_ms == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Info,
            category: "limits",
            path: "retry.backoff_base_ms".into(),
            message: "retries will run back-to-back without backoff".into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("abc", "abc"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("max_mesages", "max_messages"), 1);
    }

    #[test]
    fn empty_config_is_valid() {
        let result = validate_toml_str("");
        assert!(!result.has_errors());
        assert!(result.diagnostics.is_empty());
    }

    #[test]
    fn misspelled_nested_key_gets_suggestion() {
        let result = validate_toml_str("[accumulator]\nmax_mesages = 3\n");
        let diag = result
            .diagnostics
            .iter()
            .find(|d| d.category == "unknown-field")
            .map(|d| (d.path.as_str(), d.message.as_str()));
        assert_eq!(
            diag,
            Some((
                "accumulator.max_mesages",
                "unknown field (did you mean \"max_messages\"?)"
            ))
        );
    }

    #[test]
    fn unknown_top_level_section_flagged() {
        let result = validate_toml_str("[handler]\ndir = \"x\"\n");
        assert!(result.has_errors());
        assert!(
            result.diagnostics[0]
                .message
                .contains("did you mean \"handlers\"")
        );
    }

    #[test]
    fn zero_max_messages_warns() {
        let result = validate_toml_str("[accumulator]\nmax_messages = 0\n");
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn type_error_reported() {
        let result = validate_toml_str("[accumulator]\nmax_messages = \"many\"\n");
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn syntax_error_short_circuits() {
        let result = validate_toml_str("[accumulator\n");
        assert_eq!(result.diagnostics.len(), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }
}
