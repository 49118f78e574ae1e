//! Template Metadata - Templates Are Contracts
//!
//! A template source carries three things this crate reads:
//! an `{% extends "..." %}` directive, a `{# validation: ... #}` metadata
//! block, and the variables its body references.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

use crate::rules::{ArchitectureSpec, Rule, RuleList, RuleSpec, Tier};

/// Key that marks a comment block as validation metadata.
pub const METADATA_MARKER: &str = "validation";

static EXTENDS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%-?\s*extends\s+["']([^"']+)["']\s*-?%\}"#).unwrap()
});
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{#-?(.*?)-?#\}").unwrap());
static EXPRESSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{-?(.*?)-?\}\}").unwrap());
static STATEMENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{%-?\s*(\w+)(.*?)-?%\}").unwrap());
static STRING_LITERAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""[^"]*"|'[^']*'"#).unwrap());
static IDENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").unwrap());

const RESERVED_NAMES: &[&str] = &[
    "and", "or", "not", "in", "is", "if", "else", "true", "false", "none", "True", "False",
    "None", "loop", "super", "self", "range", "caller", "varargs", "kwargs", "namespace",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Enforcement {
    #[serde(rename = "STRICT", alias = "strict")]
    Strict,
    #[serde(rename = "ARCHITECTURAL", alias = "architectural")]
    Architectural,
    #[serde(rename = "GUIDELINE", alias = "guideline")]
    Guideline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    #[serde(alias = "FORMAT")]
    Format,
    #[serde(alias = "CONTENT")]
    Content,
    #[serde(alias = "STRUCTURE")]
    Structure,
}

impl Level {
    /// Tier a strict rule gets when it does not name one.
    pub fn default_tier(self) -> Tier {
        match self {
            Level::Format => Tier::Format,
            Level::Content | Level::Structure => Tier::Architectural,
        }
    }
}

/// Rules and descriptive fields parsed from one template.
///
/// An all-empty value is a template without rules, not an error.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TemplateMetadata {
    pub enforcement: Option<Enforcement>,
    pub level: Option<Level>,
    pub extends: Option<String>,
    pub strict_rules: Vec<Rule>,
    pub guideline_rules: Vec<Rule>,
    pub variables: BTreeSet<String>,
    pub purpose: Option<String>,
    pub hints: Vec<String>,
}

impl TemplateMetadata {
    pub fn is_empty(&self) -> bool {
        self.enforcement.is_none()
            && self.level.is_none()
            && self.extends.is_none()
            && self.strict_rules.is_empty()
            && self.guideline_rules.is_empty()
            && self.purpose.is_none()
            && self.hints.is_empty()
    }

    pub fn rule_count(&self) -> usize {
        self.strict_rules.len() + self.guideline_rules.len()
    }
}

/// Metadata block fields as written, before rule compilation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawMetadata {
    pub enforcement: Option<Enforcement>,
    pub level: Option<Level>,
    pub extends: Option<String>,
    pub purpose: Option<String>,
    pub hints: Vec<String>,
    pub strict_rules: Vec<RuleSpec>,
    pub guideline_rules: Vec<RuleSpec>,
    pub architecture: Option<ArchitectureSpec>,
}

impl RawMetadata {
    pub fn compile(self) -> Result<TemplateMetadata, String> {
        let default_tier = self.level.map_or(Tier::Format, Level::default_tier);

        let mut strict_rules = self
            .strict_rules
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                spec.compile(RuleList::Strict, default_tier)
                    .map_err(|e| format!("strict_rules[{}]: {}", i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(arch) = &self.architecture {
            strict_rules.extend(arch.compile().map_err(|e| format!("architecture: {}", e))?);
        }

        let guideline_rules = self
            .guideline_rules
            .iter()
            .enumerate()
            .map(|(i, spec)| {
                spec.compile(RuleList::Guideline, default_tier)
                    .map_err(|e| format!("guideline_rules[{}]: {}", i, e))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(TemplateMetadata {
            enforcement: self.enforcement,
            level: self.level,
            extends: self.extends,
            strict_rules,
            guideline_rules,
            variables: BTreeSet::new(),
            purpose: self.purpose,
            hints: self.hints,
        })
    }
}

/// Merge a template's metadata over its parent's.
///
/// Scalars: child wins when present. Rule lists: child rules then parent
/// rules, no de-duplication. Hints: the child's list unless it is empty.
/// Variables: union.
pub fn merge_metadata(child: &TemplateMetadata, parent: &TemplateMetadata) -> TemplateMetadata {
    TemplateMetadata {
        enforcement: child.enforcement.or(parent.enforcement),
        level: child.level.or(parent.level),
        extends: child.extends.clone().or_else(|| parent.extends.clone()),
        strict_rules: child
            .strict_rules
            .iter()
            .chain(&parent.strict_rules)
            .cloned()
            .collect(),
        guideline_rules: child
            .guideline_rules
            .iter()
            .chain(&parent.guideline_rules)
            .cloned()
            .collect(),
        variables: child.variables.union(&parent.variables).cloned().collect(),
        purpose: child.purpose.clone().or_else(|| parent.purpose.clone()),
        hints: if child.hints.is_empty() {
            parent.hints.clone()
        } else {
            child.hints.clone()
        },
    }
}

/// Target of the first `{% extends %}` directive, if any.
pub fn find_extends(source: &str) -> Option<String> {
    EXTENDS_RE
        .captures(source)
        .map(|caps| caps[1].trim().to_string())
}

/// Body of the first comment block that declares the metadata marker.
pub fn find_metadata_block(source: &str) -> Option<String> {
    let marker = format!("{}:", METADATA_MARKER);
    COMMENT_RE
        .captures_iter(source)
        .map(|caps| caps[1].to_string())
        .find(|body| body.lines().any(|line| line.trim_start().starts_with(&marker)))
        .map(|body| dedent(&body))
}

/// Parse a metadata block body into its raw fields.
///
/// The body must be a mapping with the single key [`METADATA_MARKER`].
pub fn parse_metadata_block(body: &str) -> Result<RawMetadata, String> {
    let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(body).map_err(|e| e.to_string())?;
    let mapping = value
        .as_mapping()
        .ok_or_else(|| "metadata block is not a mapping".to_string())?;

    if mapping.len() != 1 {
        return Err(format!(
            "metadata block must hold only the `{}` key, found {} keys",
            METADATA_MARKER,
            mapping.len()
        ));
    }

    let inner = mapping
        .get(METADATA_MARKER)
        .ok_or_else(|| format!("metadata block has no `{}` key", METADATA_MARKER))?;

    if inner.is_null() {
        return Ok(RawMetadata::default());
    }

    serde_yaml_ng::from_value(inner.clone()).map_err(|e| e.to_string())
}

/// Names the template body reads but never binds.
pub fn free_variables(source: &str) -> BTreeSet<String> {
    let uncommented = COMMENT_RE.replace_all(source, "");
    let source = uncommented.as_ref();
    let mut bound = BTreeSet::new();
    let mut referenced = BTreeSet::new();

    for caps in STATEMENT_RE.captures_iter(source) {
        let keyword = &caps[1];
        let rest = caps[2].trim();
        match keyword {
            "set" => {
                let targets = rest.split('=').next().unwrap_or("");
                bound.extend(identifiers(targets));
                if let Some((_, value)) = rest.split_once('=') {
                    referenced.extend(expression_heads(value));
                }
            }
            "for" => {
                if let Some((targets, iterable)) = rest.split_once(" in ") {
                    bound.extend(identifiers(targets));
                    referenced.extend(expression_heads(iterable));
                }
            }
            "macro" => {
                if let Some((name, params)) = rest.split_once('(') {
                    bound.insert(name.trim().to_string());
                    for param in params.trim_end_matches(')').split(',') {
                        let name = param.split('=').next().unwrap_or("").trim();
                        if !name.is_empty() {
                            bound.insert(name.to_string());
                        }
                    }
                }
            }
            "if" | "elif" => referenced.extend(expression_heads(rest)),
            _ => {}
        }
    }

    for caps in EXPRESSION_RE.captures_iter(source) {
        referenced.extend(expression_heads(&caps[1]));
    }

    referenced.difference(&bound).cloned().collect()
}

fn identifiers(text: &str) -> Vec<String> {
    IDENT_RE
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .filter(|name| !RESERVED_NAMES.contains(&name.as_str()))
        .collect()
}

/// Leading names of variable paths in an expression.
///
/// Skips attribute access, filter and test names, and keyword arguments.
fn expression_heads(expr: &str) -> Vec<String> {
    let stripped = STRING_LITERAL_RE.replace_all(expr, "\"\"");
    let text = stripped.as_ref();
    let mut heads = vec![];
    let mut after_is = false;

    for m in IDENT_RE.find_iter(text) {
        let name = m.as_str();
        let before = text[..m.start()].trim_end();
        let after = text[m.end()..].trim_start();

        let preceded_by = before.chars().last();
        let is_test = after_is;
        after_is = name == "is" || (after_is && name == "not");

        if is_test
            || matches!(preceded_by, Some('.') | Some('|'))
            || (after.starts_with('=') && !after.starts_with("=="))
            || RESERVED_NAMES.contains(&name)
        {
            continue;
        }
        heads.push(name.to_string());
    }
    heads
}

fn dedent(body: &str) -> String {
    let indent = body
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);

    body.lines()
        .map(|line| line.get(indent..).unwrap_or_else(|| line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}
