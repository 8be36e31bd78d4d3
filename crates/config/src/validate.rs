//! Configuration validation.
//!
//! Validates configuration files against the known schema, detects
//! unknown/misspelled fields, and reports values the bridge would accept but
//! that cannot work (zero poll bounds, unparsable proxy URL, ...).

use std::{collections::HashMap, path::Path};

use crate::schema::BridgeConfig;

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
    /// Category: "syntax", "unknown-field", "type-error", "value", "security",
    /// "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "actions.poll_interval_ms"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
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

// ── Known keys ──────────────────────────────────────────────────────────────

fn known_sections() -> HashMap<&'static str, &'static [&'static str]> {
    HashMap::from([
        ("server", ["bind", "port"].as_slice()),
        (
            "engine",
            [
                "base_url",
                "auth_token",
                "request_timeout_secs",
                "startup_timeout_secs",
            ]
            .as_slice(),
        ),
        (
            "actions",
            [
                "convert_expression",
                "edit_expression",
                "client_probe_expression",
                "client_marker",
                "poll_interval_ms",
                "poll_max_attempts",
                "edit_settle_ms",
            ]
            .as_slice(),
        ),
    ])
}

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

/// Find the best match for `needle` among `candidates` using Levenshtein
/// distance. Returns `Some(best)` if the distance is <= `max_distance`.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

fn unknown_field(path: String, key: &str, candidates: &[&str]) -> Diagnostic {
    let message = match suggest(key, candidates, 3) {
        Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
        None => "unknown field".to_string(),
    };
    Diagnostic::new(Severity::Error, "unknown-field", path, message)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Info,
                "file-ref",
                "",
                "no config file found; using defaults",
            )],
            config_path: None,
        };
    };

    let is_toml = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .is_none_or(|ext| ext == "toml");

    let mut result = if is_toml {
        match std::fs::read_to_string(actual_path) {
            Ok(content) => validate_toml_str(&crate::env_subst::substitute_env(&content)),
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "syntax",
                    "",
                    format!("failed to read config file: {e}"),
                )],
                config_path: None,
            },
        }
    } else {
        match crate::loader::load_config(actual_path) {
            Ok(config) => {
                let mut diagnostics = Vec::new();
                check_values(&config, &mut diagnostics);
                ValidationResult {
                    diagnostics,
                    config_path: None,
                }
            },
            Err(e) => ValidationResult {
                diagnostics: vec![Diagnostic::new(
                    Severity::Error,
                    "type-error",
                    "",
                    e.to_string(),
                )],
                config_path: None,
            },
        }
    };
    result.config_path = Some(actual_path.clone());
    result
}

/// Validate a TOML string without file-system side effects.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("TOML syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    if let Some(table) = toml_value.as_table() {
        check_unknown_fields(table, &mut diagnostics);
    }

    // 3. Types, then values on the parsed config
    match toml::from_str::<BridgeConfig>(toml_str) {
        Ok(config) => check_values(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(table: &toml::Table, diagnostics: &mut Vec<Diagnostic>) {
    let sections = known_sections();
    let mut section_names: Vec<&str> = sections.keys().copied().collect();
    section_names.sort_unstable();

    for (key, value) in table {
        let Some(fields) = sections.get(key.as_str()) else {
            diagnostics.push(unknown_field(key.clone(), key, &section_names));
            continue;
        };
        let Some(inner) = value.as_table() else {
            continue;
        };
        for field in inner.keys() {
            if !fields.contains(&field.as_str()) {
                diagnostics.push(unknown_field(format!("{key}.{field}"), field, fields));
            }
        }
    }
}

/// Semantic checks on a config that deserialized successfully.
pub fn check_values(config: &BridgeConfig, diagnostics: &mut Vec<Diagnostic>) {
    let actions = &config.actions;

    if actions.poll_interval_ms == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "actions.poll_interval_ms",
            "must be greater than zero",
        ));
    }
    if actions.poll_max_attempts == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "actions.poll_max_attempts",
            "must be at least 1",
        ));
    }
    if actions.client_marker.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "actions.client_marker",
            "empty marker would match any probe output",
        ));
    }
    for placeholder in ["{source}", "{target}"] {
        if !actions.convert_expression.contains(placeholder) {
            diagnostics.push(Diagnostic::new(
                Severity::Warning,
                "value",
                "actions.convert_expression",
                format!("template does not use {placeholder}"),
            ));
        }
    }
    if !actions.edit_expression.contains("{path}") {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "actions.edit_expression",
            "template does not use {path}",
        ));
    }

    match url::Url::parse(&config.engine.base_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {},
        Ok(url) => diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "value",
            "engine.base_url",
            format!("unexpected scheme \"{}\"", url.scheme()),
        )),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "engine.base_url",
            format!("invalid URL: {e}"),
        )),
    }
    if config.engine.startup_timeout_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "value",
            "engine.startup_timeout_secs",
            "must be greater than zero",
        ));
    }

    if config.server.bind == "0.0.0.0" || config.server.bind == "::" {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "security",
            "server.bind",
            "bridge has no authentication; binding all interfaces exposes the engine",
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categories(result: &ValidationResult) -> Vec<(&'static str, String)> {
        result
            .diagnostics
            .iter()
            .map(|d| (d.category, d.path.clone()))
            .collect()
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("hello", "hello"), 0);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("port", "prot"), 2);
    }

    #[test]
    fn empty_config_is_clean() {
        let result = validate_toml_str("");
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn default_template_is_clean() {
        let result = validate_toml_str(&crate::template::default_config_template());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn reports_syntax_error() {
        let result = validate_toml_str("this is not valid toml [[[");
        assert!(result.has_errors());
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn suggests_misspelled_section_and_field() {
        let result = validate_toml_str("[sever]\nport = 1\n[actions]\npoll_intervl_ms = 5\n");
        let unknown: Vec<_> = result
            .diagnostics
            .iter()
            .filter(|d| d.category == "unknown-field")
            .collect();
        assert_eq!(unknown.len(), 2);
        assert!(unknown.iter().any(|d| d.path == "sever" && d.message.contains("server")));
        assert!(unknown
            .iter()
            .any(|d| d.path == "actions.poll_intervl_ms" && d.message.contains("poll_interval_ms")));
    }

    #[test]
    fn reports_type_error() {
        let result = validate_toml_str("[server]\nport = \"not a number\"\n");
        assert!(categories(&result).contains(&("type-error", String::new())));
    }

    #[test]
    fn rejects_zero_poll_bounds_and_empty_marker() {
        let result = validate_toml_str(
            "[actions]\npoll_interval_ms = 0\npoll_max_attempts = 0\nclient_marker = \"\"\n",
        );
        assert_eq!(result.count(Severity::Error), 3);
    }

    #[test]
    fn flags_bad_engine_url() {
        let result = validate_toml_str("[engine]\nbase_url = \"not a url\"\n");
        assert!(categories(&result).contains(&("value", "engine.base_url".to_string())));
        assert!(result.has_errors());
    }

    #[test]
    fn warns_on_template_without_placeholders() {
        let result = validate_toml_str("[actions]\nedit_expression = \"open_the_file\"\n");
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn warns_on_wildcard_bind() {
        let result = validate_toml_str("[server]\nbind = \"0.0.0.0\"\n");
        assert!(categories(&result).contains(&("security", "server.bind".to_string())));
    }

    #[test]
    fn validate_missing_file_reports_read_error() {
        let path = std::env::temp_dir().join("commbridge-validate-missing.toml");
        let result = validate(Some(&path));
        assert!(result.has_errors());
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
    }
}
