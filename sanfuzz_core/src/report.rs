use crate::executor::ExecutionResult;
use crate::reproducer::{CrashRecord, read_log};
use crate::sanitizer::CompileOutcome;
use crate::static_checks::Finding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const COMPILE_STDERR_LIMIT: usize = 4000;
const CRASH_LOG_LIMIT: usize = 10_000;

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Failed to write report {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("Failed to read report {path:?}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("Report {path:?} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Compile and smoke-run outcome for one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SanitizerEntry {
    pub compile_returncode: i32,
    pub compile_stdout: String,
    pub compile_stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_returncode: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_stderr: Option<String>,
}

impl From<&CompileOutcome> for SanitizerEntry {
    fn from(outcome: &CompileOutcome) -> Self {
        Self {
            compile_returncode: outcome.return_code,
            compile_stdout: outcome.stdout.clone(),
            compile_stderr: outcome.stderr.clone(),
            ..Self::default()
        }
    }
}

impl SanitizerEntry {
    /// Records the smoke-run outcome of the compiled binary.
    pub fn record_run(&mut self, result: &ExecutionResult) {
        self.run_returncode = Some(result.return_code);
        self.run_stdout = Some(result.stdout.clone());
        self.run_stderr = Some(result.stderr.clone());
    }
}

/// Everything one scan produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanReport {
    pub generated_at: String,
    pub target: String,
    #[serde(default)]
    pub static_findings: Vec<Finding>,
    /// Keyed by source path.
    #[serde(default)]
    pub sanitizer: BTreeMap<String, SanitizerEntry>,
    #[serde(default)]
    pub fuzzer_crashes: Vec<CrashRecord>,
}

impl ScanReport {
    /// An empty report for `target`, stamped with the current local time.
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            generated_at: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string(),
            target: target.into(),
            static_findings: Vec::new(),
            sanitizer: BTreeMap::new(),
            fuzzer_crashes: Vec::new(),
        }
    }

    /// Writes pretty-printed JSON, creating parent directories.
    pub fn write_json(&self, path: &Path) -> Result<(), ReportError> {
        let write_err = |source| ReportError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ReportError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, json).map_err(write_err)
    }

    /// Reads a report previously written by [`ScanReport::write_json`].
    pub fn load_json(path: &Path) -> Result<Self, ReportError> {
        let text = fs::read_to_string(path).map_err(|source| ReportError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ReportError::Json {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Writes `html` to `path`, creating parent directories.
pub fn write_html(html: &str, path: &Path) -> Result<(), ReportError> {
    let write_err = |source| ReportError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, html).map_err(write_err)
}

/// Escapes the five HTML-significant characters.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

fn severity_color(severity: &str) -> &'static str {
    match severity {
        "CRITICAL" => "#b91c1c",
        "HIGH" => "#f97316",
        "MEDIUM" => "#f59e0b",
        _ => "#10b981",
    }
}

/// First `limit` characters of `text`.
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

const STYLE: &str = "\
body{background:#0b1220;color:#e6eef8;font-family:Inter,Segoe UI,Arial;padding:24px}
.container{max-width:980px;margin:0 auto}
.header{display:flex;justify-content:space-between;align-items:center}
.card{background:#081028;padding:14px;border-radius:10px;margin-top:12px}
.small{color:#9fb0d6;font-size:13px}
.table{width:100%;border-collapse:collapse;margin-top:8px}
.table th{background:#07102a;padding:8px;text-align:left;color:#9fb0d6}
.table td{padding:8px;border-top:1px solid rgba(255,255,255,0.03)}
.badge{display:inline-block;padding:5px 8px;border-radius:6px;font-weight:600;font-size:12px}
.crash{background:#07102a;padding:12px;border-radius:8px;margin-top:8px}
.code{background:#02111f;padding:8px;border-radius:6px;font-family:monospace;white-space:pre-wrap}
";

/// Renders a self-contained HTML page. Crash logs are read from disk; a
/// missing log is noted in place.
pub fn render_html(report: &ScanReport) -> String {
    let mut html = String::new();
    let target = escape_html(&report.target);

    let _ = write!(
        html,
        "<!doctype html><html><head><meta charset='utf-8'><title>Scan report: {target}</title>\
         <style>{STYLE}</style></head><body><div class='container'>"
    );
    let _ = write!(
        html,
        "<div class='header'><h1>Scan Report</h1><div><div class='small'>Target</div>\
         <strong>{target}</strong><div class='small'>Generated: {}</div></div></div>",
        escape_html(&report.generated_at)
    );
    let _ = write!(
        html,
        "<div class='card'><span class='small'>Static findings</span> <strong>{}</strong> \
         <span class='small'>Fuzzer crashes</span> <strong>{}</strong></div>",
        report.static_findings.len(),
        report.fuzzer_crashes.len()
    );

    html.push_str("<div class='card'><h3>Static Findings</h3>");
    if report.static_findings.is_empty() {
        html.push_str("<div class='small'>No static findings.</div>");
    } else {
        html.push_str(
            "<table class='table'><thead><tr><th>ID</th><th>File:Line</th><th>Description</th>\
             <th>Snippet</th><th>Fix</th><th>Severity</th></tr></thead><tbody>",
        );
        for finding in &report.static_findings {
            let _ = write!(
                html,
                "<tr><td>{}</td><td>{}:{}</td><td>{}</td><td><div class='code'>{}</div></td>\
                 <td>{}</td><td><span class='badge' style='background:{}'>{}</span></td></tr>",
                escape_html(&finding.id),
                escape_html(&finding.file.to_string_lossy()),
                finding.line,
                escape_html(&finding.message),
                escape_html(&finding.snippet),
                escape_html(&finding.suggested_fix),
                severity_color(&finding.severity),
                escape_html(&finding.severity),
            );
        }
        html.push_str("</tbody></table>");
    }
    html.push_str("</div>");

    html.push_str("<div class='card'><h3>Sanitizer / Compile Info</h3>");
    for (source, entry) in &report.sanitizer {
        let _ = write!(
            html,
            "<div><strong>{}</strong><div class='small'>compile_returncode: {}</div>",
            escape_html(source),
            entry.compile_returncode
        );
        if !entry.compile_stderr.is_empty() {
            let _ = write!(
                html,
                "<div class='code'>{}</div>",
                escape_html(truncate_chars(&entry.compile_stderr, COMPILE_STDERR_LIMIT))
            );
        }
        if let Some(rc) = entry.run_returncode {
            let _ = write!(html, "<div class='small'>run_returncode: {rc}</div>");
        }
        html.push_str("</div>");
    }
    html.push_str("</div>");

    html.push_str("<div class='card'><h3>Fuzzer Crashes</h3>");
    if report.fuzzer_crashes.is_empty() {
        html.push_str("<div class='small'>No crashes found.</div>");
    }
    for crash in &report.fuzzer_crashes {
        let _ = write!(
            html,
            "<div class='crash'><div><strong>Input file:</strong> {}</div>",
            escape_html(&crash.input_path.to_string_lossy())
        );
        match read_log(&crash.log_path) {
            Ok(log) => {
                let _ = write!(
                    html,
                    "<div class='code'>{}</div>",
                    escape_html(truncate_chars(&log, CRASH_LOG_LIMIT))
                );
            }
            Err(e) => {
                log::debug!("{e}");
                html.push_str("<div class='small'>Log file not found or missing.</div>");
            }
        }
        let _ = write!(
            html,
            "<div><strong>Return code:</strong> {}</div></div>",
            crash.return_code
        );
    }
    html.push_str("</div>");

    html.push_str("</div></body></html>");
    html
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn finding(severity: &str, snippet: &str) -> Finding {
        Finding {
            id: "S001".to_string(),
            file: PathBuf::from("samples/vuln.c"),
            line: 12,
            message: "Use of strcpy() without bounds check".to_string(),
            severity: severity.to_string(),
            snippet: snippet.to_string(),
            suggested_fix: "Use strncpy() or bounds check".to_string(),
        }
    }

    #[test]
    fn new_report_has_local_timestamp() {
        let report = ScanReport::new("samples");
        assert_eq!(report.target, "samples");
        let parsed =
            chrono::NaiveDateTime::parse_from_str(&report.generated_at, "%Y-%m-%dT%H:%M:%S");
        assert!(parsed.is_ok(), "unexpected timestamp {}", report.generated_at);
        assert!(report.static_findings.is_empty());
    }

    #[test]
    fn json_round_trip_through_disk() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reports").join("report.json");

        let mut report = ScanReport::new("samples");
        report.static_findings.push(finding("HIGH", "strcpy(a, b);"));
        let mut entry = SanitizerEntry {
            compile_returncode: 0,
            ..SanitizerEntry::default()
        };
        entry.record_run(&ExecutionResult {
            return_code: 1,
            stdout: String::new(),
            stderr: "AddressSanitizer".to_string(),
            timed_out: false,
        });
        report.sanitizer.insert("samples/vuln.c".to_string(), entry);

        report.write_json(&path).unwrap();
        assert_eq!(ScanReport::load_json(&path).unwrap(), report);
    }

    #[test]
    fn compile_only_entry_omits_run_fields() {
        let entry = SanitizerEntry {
            compile_returncode: 1,
            compile_stderr: "error: expected ';'".to_string(),
            ..SanitizerEntry::default()
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["compile_returncode"], 1);
        assert!(json.get("run_returncode").is_none());
        assert!(json.get("run_stderr").is_none());
    }

    #[test]
    fn load_json_reports_malformed_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ScanReport::load_json(&path),
            Err(ReportError::Json { .. })
        ));
        assert!(matches!(
            ScanReport::load_json(&dir.path().join("missing.json")),
            Err(ReportError::Read { .. })
        ));
    }

    #[test]
    fn html_escapes_interpolated_text() {
        let mut report = ScanReport::new("<script>alert(1)</script>");
        report
            .static_findings
            .push(finding("HIGH", "strcpy(buf, \"<b>&\");"));
        let html = render_html(&report);

        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
        assert!(html.contains("strcpy(buf, &quot;&lt;b&gt;&amp;&quot;);"));
        assert!(html.contains("background:#f97316"));
    }

    #[test]
    fn html_truncates_compile_stderr_and_crash_logs() {
        let dir = tempdir().unwrap();
        let log_path = dir.path().join("crash_1.log");
        fs::write(&log_path, "L".repeat(CRASH_LOG_LIMIT + 500)).unwrap();

        let mut report = ScanReport::new("samples");
        report.sanitizer.insert(
            "samples/big.c".to_string(),
            SanitizerEntry {
                compile_returncode: 1,
                compile_stderr: "E".repeat(COMPILE_STDERR_LIMIT + 10),
                ..SanitizerEntry::default()
            },
        );
        report.fuzzer_crashes.push(CrashRecord {
            input_path: dir.path().join("crash_1.bin"),
            log_path,
            return_code: -11,
            input_hash: String::new(),
        });
        report.fuzzer_crashes.push(CrashRecord {
            input_path: dir.path().join("crash_2.bin"),
            log_path: dir.path().join("crash_2.log"),
            return_code: 1,
            input_hash: String::new(),
        });

        let html = render_html(&report);
        assert!(html.contains(&"E".repeat(COMPILE_STDERR_LIMIT)));
        assert!(!html.contains(&"E".repeat(COMPILE_STDERR_LIMIT + 1)));
        assert!(html.contains(&"L".repeat(CRASH_LOG_LIMIT)));
        assert!(!html.contains(&"L".repeat(CRASH_LOG_LIMIT + 1)));
        assert!(html.contains("Log file not found or missing."));
        assert!(html.contains("<strong>Return code:</strong> -11"));
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }

    #[test]
    fn write_html_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("report.html");
        write_html("<html></html>", &path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<html></html>");
    }
}
