//! Regex-based detection of dangerous C API usage.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum StaticCheckError {
    #[error("Rule {id} has an invalid pattern: {source}")]
    InvalidPattern { id: String, source: regex::Error },
}

/// Declarative form of a rule, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RuleSpec {
    pub id: String,
    pub pattern: String,
    pub message: String,
    pub severity: String,
    pub fix: String,
}

/// A compiled rule. Patterns match case-insensitively.
#[derive(Debug, Clone)]
pub struct Rule {
    pub spec: RuleSpec,
    regex: Regex,
}

impl Rule {
    pub fn compile(spec: RuleSpec) -> Result<Self, StaticCheckError> {
        let regex = RegexBuilder::new(&spec.pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| StaticCheckError::InvalidPattern {
                id: spec.id.clone(),
                source,
            })?;
        Ok(Self { spec, regex })
    }
}

/// One rule match in one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub file: PathBuf,
    /// 1-based.
    pub line: usize,
    pub message: String,
    pub severity: String,
    /// The matching source line, trimmed.
    pub snippet: String,
    pub suggested_fix: String,
}

fn spec(id: &str, pattern: &str, message: &str, severity: &str, fix: &str) -> RuleSpec {
    RuleSpec {
        id: id.to_string(),
        pattern: pattern.to_string(),
        message: message.to_string(),
        severity: severity.to_string(),
        fix: fix.to_string(),
    }
}

pub fn builtin_rule_specs() -> Vec<RuleSpec> {
    vec![
        spec(
            "S001",
            r"\bstrcpy\s*\(",
            "Use of strcpy() without bounds check",
            "HIGH",
            "Use strncpy() or bounds check",
        ),
        spec(
            "S002",
            r"\bgets\s*\(",
            "Use of gets() which is unsafe",
            "HIGH",
            "Use fgets()",
        ),
        spec(
            "S003",
            r"\bsprintf\s*\(",
            "Use of sprintf() without bounds check",
            "MEDIUM",
            "Use snprintf()",
        ),
        spec(
            "S004",
            r#""([A-Za-z0-9_@!$%^&*()-]{8,})""#,
            "Possible hard-coded credential found",
            "HIGH",
            "Store secrets in environment variables instead of source code.",
        ),
        spec(
            "S005",
            r"\bsystem\s*\(",
            "Use of system() can lead to command injection",
            "HIGH",
            "Avoid system(); use execve() safely with proper validation",
        ),
        spec(
            "S009",
            r"\bstrcat\s*\(",
            "Use of strcat() without bounds check",
            "HIGH",
            "Use strncat() with proper bounds checking",
        ),
    ]
}

/// Compiles the built-in rules followed by `extra`.
pub fn load_rules(extra: &[RuleSpec]) -> Result<Vec<Rule>, StaticCheckError> {
    builtin_rule_specs()
        .into_iter()
        .chain(extra.iter().cloned())
        .map(Rule::compile)
        .collect()
}

/// Every `*.c` file under `dir`, in a stable order.
pub fn c_sources(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("Skipping unreadable directory entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "c"))
        .collect()
}

/// Applies `rules` to one source text.
pub fn check_source(file: &Path, text: &str, rules: &[Rule]) -> Vec<Finding> {
    let lines: Vec<&str> = text.lines().collect();
    let mut findings = Vec::new();
    for rule in rules {
        for m in rule.regex.find_iter(text) {
            let line = text[..m.start()].matches('\n').count() + 1;
            let snippet = lines.get(line - 1).map(|l| l.trim()).unwrap_or_default();
            findings.push(Finding {
                id: rule.spec.id.clone(),
                file: file.to_path_buf(),
                line,
                message: rule.spec.message.clone(),
                severity: rule.spec.severity.clone(),
                snippet: snippet.to_string(),
                suggested_fix: rule.spec.fix.clone(),
            });
        }
    }
    findings
}

/// Scans every `*.c` file under `dir`. Unreadable files are skipped.
pub fn scan_directory(dir: &Path, rules: &[Rule]) -> Vec<Finding> {
    let mut findings = Vec::new();
    for path in c_sources(dir) {
        match fs::read(&path) {
            Ok(bytes) => {
                let text = String::from_utf8_lossy(&bytes);
                findings.extend(check_source(&path, &text, rules));
            }
            Err(e) => log::warn!("Skipping unreadable source {:?}: {}", path, e),
        }
    }
    findings
}
