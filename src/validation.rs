//! Validation System - Issues, Scores, and the Validator Capability
//!
//! Validators produce structured issues.
//! The edit pipeline decides what those issues block.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fs;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use crate::rules::Severity;

pub const SCORE_CLEAN: f64 = 10.0;
pub const SCORE_WARNINGS: f64 = 8.0;
pub const SCORE_FAILED: f64 = 0.0;

static TOOL_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?P<file>[^:\n]+):(?P<line>\d+):(?:(?P<col>\d+):)?\s*(?:(?P<sev>error|warning|note|info)\s*:)?\s*(?P<msg>.+)$",
    )
    .unwrap()
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub message: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ValidationIssue {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            severity,
            line: None,
            column: None,
            code: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(Severity::Warning, message)
    }

    pub fn at(mut self, line: usize, column: Option<usize>) -> Self {
        self.line = Some(line);
        self.column = column;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.severity)?;
        if let Some(line) = self.line {
            match self.column {
                Some(col) => write!(f, " {}:{}", line, col)?,
                None => write!(f, " line {}", line)?,
            }
        }
        if let Some(code) = &self.code {
            write!(f, " ({})", code)?;
        }
        write!(f, " {}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub score: f64,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    pub fn success() -> Self {
        Self {
            passed: true,
            score: SCORE_CLEAN,
            issues: vec![],
        }
    }

    /// Score a set of issues: clean 10, warnings only 8, any error 0.
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        let has_errors = issues.iter().any(|i| i.severity == Severity::Error);
        let score = if has_errors {
            SCORE_FAILED
        } else if issues.is_empty() {
            SCORE_CLEAN
        } else {
            SCORE_WARNINGS
        };
        Self {
            passed: !has_errors,
            score,
            issues,
        }
    }

    /// Combine the results of several validators run on the same content.
    ///
    /// Passes only if every result passed; the score is the lowest score.
    pub fn combine(results: impl IntoIterator<Item = ValidationResult>) -> Self {
        let mut combined = Self::success();
        for result in results {
            combined.passed &= result.passed;
            combined.score = combined.score.min(result.score);
            combined.issues.extend(result.issues);
        }
        combined
    }

    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }

    /// One line per issue, headed by the score.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!(
            "{} (score {:.1})",
            if self.passed { "passed" } else { "failed" },
            self.score
        )];
        lines.extend(self.issues.iter().map(|i| format!("  {}", i)));
        lines.join("\n")
    }
}

/// Anything that can judge candidate file content.
///
/// Implementations hold only read-only configuration so one instance can be
/// shared across threads.
pub trait Validator: Send + Sync {
    fn name(&self) -> &str;

    /// Validate `content`, or the file at `path` when no content is given.
    fn validate(&self, path: &Path, content: Option<&str>) -> ValidationResult;
}

/// Content to validate: the supplied text, or the file on disk.
///
/// An unreadable file becomes a failed result.
pub fn load_content<'a>(
    path: &Path,
    content: Option<&'a str>,
) -> Result<Cow<'a, str>, ValidationResult> {
    match content {
        Some(c) => Ok(Cow::Borrowed(c)),
        None => fs::read_to_string(path).map(Cow::Owned).map_err(|e| {
            ValidationResult::from_issues(vec![ValidationIssue::error(format!(
                "Cannot read {}: {}",
                path.display(),
                e
            ))
            .with_code("read-error")])
        }),
    }
}

// --- Concrete Validators ---

pub struct JsonSyntaxValidator;

impl Validator for JsonSyntaxValidator {
    fn name(&self) -> &str {
        "json_syntax"
    }

    fn validate(&self, path: &Path, content: Option<&str>) -> ValidationResult {
        let content = match load_content(path, content) {
            Ok(c) => c,
            Err(result) => return result,
        };

        match serde_json::from_str::<serde_json::Value>(&content) {
            Ok(_) => ValidationResult::success(),
            Err(e) => ValidationResult::from_issues(vec![ValidationIssue::error(format!(
                "Invalid JSON: {}",
                e
            ))
            .at(e.line(), Some(e.column()))
            .with_code("json-syntax")]),
        }
    }
}

pub struct YamlSyntaxValidator;

impl Validator for YamlSyntaxValidator {
    fn name(&self) -> &str {
        "yaml_syntax"
    }

    fn validate(&self, path: &Path, content: Option<&str>) -> ValidationResult {
        let content = match load_content(path, content) {
            Ok(c) => c,
            Err(result) => return result,
        };

        for document in serde_yaml_ng::Deserializer::from_str(&content) {
            if let Err(e) = <serde_yaml_ng::Value as Deserialize>::deserialize(document) {
                let mut issue =
                    ValidationIssue::error(format!("Invalid YAML: {}", e)).with_code("yaml-syntax");
                if let Some(location) = e.location() {
                    issue = issue.at(location.line(), Some(location.column()));
                }
                return ValidationResult::from_issues(vec![issue]);
            }
        }
        ValidationResult::success()
    }
}

/// Runs an external analysis tool over the candidate content.
///
/// Content goes to the tool's stdin; `{path}` in an argument expands to the
/// target path. Output lines shaped `file:line[:col]: [severity:] message`
/// become issues.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    name: String,
    program: String,
    args: Vec<String>,
}

impl CommandValidator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        Self {
            name: format!("command:{}", program),
            program,
            args,
        }
    }

    fn run(&self, path: &Path, content: &str) -> std::io::Result<std::process::Output> {
        let args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace("{path}", &path.to_string_lossy()))
            .collect();

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdin = child.stdin.take();
        let input = content.to_string();
        let writer = std::thread::spawn(move || -> std::io::Result<()> {
            if let Some(mut stdin) = stdin {
                stdin.write_all(input.as_bytes())?;
            }
            Ok(())
        });

        let output = child.wait_with_output()?;
        if let Ok(Err(e)) = writer.join() {
            // A tool that exits without reading stdin closes the pipe early.
            if e.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(e);
            }
        }
        Ok(output)
    }
}

/// Parse tool output lines into issues.
pub fn parse_tool_output(output: &str) -> Vec<ValidationIssue> {
    output
        .lines()
        .filter_map(|line| TOOL_LINE_RE.captures(line.trim_end()))
        .map(|caps| {
            let severity = match caps.name("sev").map(|m| m.as_str()) {
                Some("warning") | Some("note") | Some("info") => Severity::Warning,
                _ => Severity::Error,
            };
            let line = caps["line"].parse().unwrap_or(0);
            let column = caps.name("col").and_then(|m| m.as_str().parse().ok());
            ValidationIssue::new(severity, caps["msg"].trim()).at(line, column)
        })
        .collect()
}

impl Validator for CommandValidator {
    fn name(&self) -> &str {
        &self.name
    }

    fn validate(&self, path: &Path, content: Option<&str>) -> ValidationResult {
        let content = match load_content(path, content) {
            Ok(c) => c,
            Err(result) => return result,
        };

        let output = match self.run(path, &content) {
            Ok(o) => o,
            Err(e) => {
                tracing::warn!("{} could not run: {}", self.name, e);
                return ValidationResult::from_issues(vec![ValidationIssue::error(format!(
                    "Failed to run {}: {}",
                    self.program, e
                ))
                .with_code("tool-error")]);
            }
        };

        let text = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        let mut issues = parse_tool_output(&text);

        if !output.status.success() && !issues.iter().any(|i| i.severity == Severity::Error) {
            let detail = text.trim();
            issues.push(
                ValidationIssue::error(format!(
                    "{} exited with {}{}",
                    self.program,
                    output.status,
                    if detail.is_empty() {
                        String::new()
                    } else {
                        format!(": {}", detail)
                    }
                ))
                .with_code("tool-failed"),
            );
        }

        ValidationResult::from_issues(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scoring() {
        assert_eq!(ValidationResult::from_issues(vec![]).score, 10.0);

        let warned = ValidationResult::from_issues(vec![ValidationIssue::warning("w")]);
        assert!(warned.passed);
        assert_eq!(warned.score, 8.0);

        let failed = ValidationResult::from_issues(vec![
            ValidationIssue::warning("w"),
            ValidationIssue::error("e"),
        ]);
        assert!(!failed.passed);
        assert_eq!(failed.score, 0.0);
    }

    #[test]
    fn test_combine_takes_lowest_score() {
        let combined = ValidationResult::combine(vec![
            ValidationResult::success(),
            ValidationResult::from_issues(vec![ValidationIssue::warning("w")]),
        ]);
        assert!(combined.passed);
        assert_eq!(combined.score, 8.0);
        assert_eq!(combined.issues.len(), 1);

        assert_eq!(ValidationResult::combine(vec![]), ValidationResult::success());
    }

    #[test]
    fn test_json_syntax_reports_position() {
        let result = JsonSyntaxValidator.validate(Path::new("x.json"), Some("{\n  \"a\": ,\n}"));
        assert!(!result.passed);
        assert_eq!(result.issues[0].line, Some(2));
        assert!(JsonSyntaxValidator
            .validate(Path::new("x.json"), Some("{\"a\": 1}"))
            .passed);
    }

    #[test]
    fn test_yaml_syntax_accepts_multiple_documents() {
        let ok = YamlSyntaxValidator.validate(Path::new("x.yaml"), Some("a: 1\n---\nb: 2\n"));
        assert!(ok.passed);

        let bad = YamlSyntaxValidator.validate(Path::new("x.yaml"), Some("a: [1, 2\n"));
        assert!(!bad.passed);
        assert_eq!(bad.issues[0].code.as_deref(), Some("yaml-syntax"));
    }

    #[test]
    fn test_unreadable_file_fails() {
        let result = JsonSyntaxValidator.validate(Path::new("/nonexistent/x.json"), None);
        assert!(!result.passed);
        assert_eq!(result.issues[0].code.as_deref(), Some("read-error"));
    }

    #[test]
    fn test_parse_tool_output() {
        let issues = parse_tool_output(
            "src/a.py:3:5: error: undefined name 'x'\nsrc/a.py:7: warning: unused import\nFound 2 problems\n",
        );
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].line, Some(3));
        assert_eq!(issues[0].column, Some(5));
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[1].severity, Severity::Warning);
        assert_eq!(issues[1].column, None);
        assert_eq!(issues[1].message, "unused import");
    }

    #[test]
    fn test_issue_display() {
        let issue = ValidationIssue::error("boom").at(4, Some(2)).with_code("E1");
        assert_eq!(issue.to_string(), "[error] 4:2 (E1) boom");
    }

    #[cfg(unix)]
    #[test]
    fn test_command_validator_exit_status() {
        let passing = CommandValidator::new("true", vec![]);
        assert!(passing.validate(Path::new("a.py"), Some("x = 1\n")).passed);

        let failing = CommandValidator::new("false", vec![]);
        let result = failing.validate(Path::new("a.py"), Some("x = 1\n"));
        assert!(!result.passed);
        assert_eq!(result.issues[0].code.as_deref(), Some("tool-failed"));
    }

    #[cfg(unix)]
    #[test]
    fn test_command_validator_reads_stdin_and_expands_path() {
        let script = "if grep -q FIXME; then echo 'lint:3:1: error: FIXME left in {path}'; exit 1; fi";
        let validator = CommandValidator::new("sh", vec!["-c".to_string(), script.to_string()]);

        let flagged = validator.validate(Path::new("src/a.py"), Some("x = 1\n# FIXME\n"));
        assert!(!flagged.passed);
        assert_eq!(flagged.issues.len(), 1);
        assert_eq!(flagged.issues[0].line, Some(3));
        assert_eq!(flagged.issues[0].column, Some(1));
        assert_eq!(flagged.issues[0].message, "FIXME left in src/a.py");

        let clean = validator.validate(Path::new("src/a.py"), Some("x = 1\n"));
        assert!(clean.passed);
        assert!(clean.issues.is_empty());
    }

    #[test]
    fn test_command_validator_missing_program() {
        let missing = CommandValidator::new("definitely-not-a-real-linter-binary", vec![]);
        let result = missing.validate(Path::new("a.py"), Some(""));
        assert_eq!(result.issues[0].code.as_deref(), Some("tool-error"));
    }
}
