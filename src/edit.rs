//! Content Mutation - rewrite, line-range edits, search/replace
//!
//! Every request is checked in full before any text changes. A line-edit
//! batch is all-or-nothing.

use regex::{NoExpand, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Replace lines `start..=end` (1-based) with `new_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineEdit {
    pub start: usize,
    pub end: usize,
    pub new_content: String,
}

impl LineEdit {
    pub fn new(start: usize, end: usize, new_content: impl Into<String>) -> Self {
        Self {
            start,
            end,
            new_content: new_content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchReplace {
    pub pattern: String,
    pub replacement: String,
    #[serde(default)]
    pub is_regex: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<usize>,
    /// Regex flags: `i` case-insensitive, `m` multi-line, `s` dot matches
    /// newline, `x` verbose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

impl SearchReplace {
    pub fn literal(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            is_regex: false,
            max_count: None,
            flags: None,
        }
    }

    pub fn regex(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            is_regex: true,
            ..Self::literal(pattern, replacement)
        }
    }

    pub fn with_max_count(mut self, max_count: usize) -> Self {
        self.max_count = Some(max_count);
        self
    }

    pub fn with_flags(mut self, flags: impl Into<String>) -> Self {
        self.flags = Some(flags.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EditRequest {
    Rewrite { content: String },
    LineEdits { edits: Vec<LineEdit> },
    SearchReplace(SearchReplace),
}

impl EditRequest {
    pub fn rewrite(content: impl Into<String>) -> Self {
        EditRequest::Rewrite {
            content: content.into(),
        }
    }

    pub fn line_edits(edits: Vec<LineEdit>) -> Self {
        EditRequest::LineEdits { edits }
    }

    /// Only a full rewrite may target a file that does not exist yet.
    pub fn can_create(&self) -> bool {
        matches!(self, EditRequest::Rewrite { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EditRequest::Rewrite { .. } => "rewrite",
            EditRequest::LineEdits { .. } => "line_edits",
            EditRequest::SearchReplace(_) => "search_replace",
        }
    }
}

/// Content after an edit, plus the substitution count for search/replace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedEdit {
    pub content: String,
    pub replacements: Option<usize>,
}

pub fn apply_edit(original: &str, request: &EditRequest) -> Result<AppliedEdit> {
    match request {
        EditRequest::Rewrite { content } => Ok(AppliedEdit {
            content: content.clone(),
            replacements: None,
        }),
        EditRequest::LineEdits { edits } => Ok(AppliedEdit {
            content: apply_line_edits(original, edits)?,
            replacements: None,
        }),
        EditRequest::SearchReplace(sr) => {
            let (content, count) = search_replace(original, sr)?;
            Ok(AppliedEdit {
                content,
                replacements: Some(count),
            })
        }
    }
}

pub fn line_count(content: &str) -> usize {
    content.split_inclusive('\n').count()
}

/// Apply a batch of non-overlapping line edits.
///
/// Edits are spliced from the bottom of the file up, so each edit's line
/// numbers refer to the original content regardless of request order.
pub fn apply_line_edits(original: &str, edits: &[LineEdit]) -> Result<String> {
    let total = line_count(original);

    for edit in edits {
        if edit.start < 1 || edit.start > edit.end || edit.end > total {
            return Err(EngineError::Bounds {
                start: edit.start,
                end: edit.end,
                line_count: total,
            });
        }
    }

    let mut sorted: Vec<&LineEdit> = edits.iter().collect();
    sorted.sort_by_key(|e| (e.start, e.end));
    for pair in sorted.windows(2) {
        let (earlier, later) = (pair[0], pair[1]);
        if earlier.end >= later.start {
            return Err(EngineError::Overlap {
                first_start: earlier.start,
                first_end: earlier.end,
                second_start: later.start,
                second_end: later.end,
            });
        }
    }

    let mut lines: Vec<String> = original.split_inclusive('\n').map(String::from).collect();
    for edit in sorted.iter().rev() {
        let terminator = line_terminator(&lines[edit.end - 1]);
        let mut replacement = edit.new_content.clone();
        if !replacement.is_empty() && !replacement.ends_with('\n') {
            replacement.push_str(terminator);
        }
        let pieces: Vec<String> = replacement.split_inclusive('\n').map(String::from).collect();
        lines.splice(edit.start - 1..edit.end, pieces);
    }

    Ok(lines.concat())
}

/// The line's ending: `"\r\n"`, `"\n"`, or `""` for an unterminated last line.
fn line_terminator(line: &str) -> &'static str {
    if line.ends_with("\r\n") {
        "\r\n"
    } else if line.ends_with('\n') {
        "\n"
    } else {
        ""
    }
}

fn build_regex(pattern: &str, flags: Option<&str>) -> Result<Regex> {
    let mut builder = RegexBuilder::new(pattern);
    for flag in flags.unwrap_or("").chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => {
                return Err(EngineError::Pattern {
                    pattern: pattern.to_string(),
                    message: format!("unknown flag '{}'", other),
                })
            }
        };
    }
    builder.build().map_err(|e| EngineError::Pattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

/// Substitute up to `max_count` non-overlapping matches.
///
/// Returns the new content and how many substitutions were made.
pub fn search_replace(content: &str, request: &SearchReplace) -> Result<(String, usize)> {
    if request.pattern.is_empty() {
        return Err(EngineError::Pattern {
            pattern: String::new(),
            message: "search pattern is empty".to_string(),
        });
    }

    let flags = request.flags.as_deref().filter(|f| !f.is_empty());

    if !request.is_regex && flags.is_none() {
        let found = content.matches(request.pattern.as_str()).count();
        let count = request.max_count.map_or(found, |max| found.min(max));
        let replaced = content.replacen(request.pattern.as_str(), &request.replacement, count);
        return Ok((replaced, count));
    }

    let regex = if request.is_regex {
        build_regex(&request.pattern, flags)?
    } else {
        build_regex(&regex::escape(&request.pattern), flags)?
    };

    let found = regex.find_iter(content).count();
    let count = request.max_count.map_or(found, |max| found.min(max));
    if count == 0 {
        return Ok((content.to_string(), 0));
    }

    let replaced = if request.is_regex {
        regex.replacen(content, count, request.replacement.as_str())
    } else {
        regex.replacen(content, count, NoExpand(&request.replacement))
    };
    Ok((replaced.into_owned(), count))
}
