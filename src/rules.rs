//! Rule Model - Compiled Structural Checks
//!
//! Rules are compiled once, when their template is loaded. A malformed
//! pattern fails the load, never the first file it is applied to.

use regex::Regex;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(Severity::Error),
            "warning" | "warn" => Ok(Severity::Warning),
            _ => Err(format!("Invalid severity: {}", s)),
        }
    }
}

/// Enforcement tier a rule is evaluated in.
///
/// Format and Architectural block a write; Guideline is advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Format,
    Architectural,
    Guideline,
}

impl Tier {
    pub fn severity(self) -> Severity {
        match self {
            Tier::Format | Tier::Architectural => Severity::Error,
            Tier::Guideline => Severity::Warning,
        }
    }

    pub fn is_blocking(self) -> bool {
        self.severity() == Severity::Error
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Format => write!(f, "format"),
            Tier::Architectural => write!(f, "architectural"),
            Tier::Guideline => write!(f, "guideline"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum RuleKind {
    /// A single pattern that must be present.
    Pattern(Regex),
    /// At least one of the patterns must be present.
    ScaffoldGroup(Vec<Regex>),
}

#[derive(Debug, Clone)]
pub struct Rule {
    pub kind: RuleKind,
    pub description: String,
    pub severity: Severity,
    pub tier: Tier,
}

impl Rule {
    pub fn pattern(pattern: &str, tier: Tier) -> Result<Self, regex::Error> {
        let regex = Regex::new(pattern)?;
        Ok(Self {
            description: format!("Missing required pattern `{}`", pattern),
            kind: RuleKind::Pattern(regex),
            severity: tier.severity(),
            tier,
        })
    }

    pub fn one_of<S: AsRef<str>>(patterns: &[S], tier: Tier) -> Result<Self, regex::Error> {
        let regexes = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let listed: Vec<&str> = patterns.iter().map(|p| p.as_ref()).collect();
        Ok(Self {
            description: format!("Expected at least one of `{}`", listed.join("`, `")),
            kind: RuleKind::ScaffoldGroup(regexes),
            severity: tier.severity(),
            tier,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn patterns(&self) -> Vec<&str> {
        match &self.kind {
            RuleKind::Pattern(re) => vec![re.as_str()],
            RuleKind::ScaffoldGroup(group) => group.iter().map(|re| re.as_str()).collect(),
        }
    }

    pub fn is_satisfied(&self, content: &str) -> bool {
        match &self.kind {
            RuleKind::Pattern(re) => re.is_match(content),
            RuleKind::ScaffoldGroup(group) => group.iter().any(|re| re.is_match(content)),
        }
    }
}

impl Serialize for Rule {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kind = match self.kind {
            RuleKind::Pattern(_) => "pattern",
            RuleKind::ScaffoldGroup(_) => "scaffold_group",
        };
        let mut state = serializer.serialize_struct("Rule", 5)?;
        state.serialize_field("kind", kind)?;
        state.serialize_field("patterns", &self.patterns())?;
        state.serialize_field("description", &self.description)?;
        state.serialize_field("severity", &self.severity)?;
        state.serialize_field("tier", &self.tier)?;
        state.end()
    }
}

/// Which metadata list a rule was declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleList {
    Strict,
    Guideline,
}

/// Rule as written in a metadata block, before compilation.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RuleSpec {
    Bare(String),
    Detailed {
        #[serde(default)]
        pattern: Option<String>,
        #[serde(default)]
        one_of: Vec<String>,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        severity: Option<Severity>,
        #[serde(default)]
        tier: Option<Tier>,
    },
}

impl RuleSpec {
    /// Compile into a [`Rule`].
    ///
    /// `default_tier` applies to strict rules that do not name a tier.
    /// Severity follows the tier; a conflicting explicit severity is refused.
    pub fn compile(&self, list: RuleList, default_tier: Tier) -> Result<Rule, String> {
        match self {
            RuleSpec::Bare(pattern) => {
                let tier = match list {
                    RuleList::Strict => default_tier,
                    RuleList::Guideline => Tier::Guideline,
                };
                Rule::pattern(pattern, tier).map_err(|e| e.to_string())
            }
            RuleSpec::Detailed {
                pattern,
                one_of,
                description,
                severity,
                tier,
            } => {
                let tier = match (list, tier) {
                    (RuleList::Guideline, None | Some(Tier::Guideline)) => Tier::Guideline,
                    (RuleList::Guideline, Some(t)) => {
                        return Err(format!("guideline rule cannot use the {} tier", t))
                    }
                    (RuleList::Strict, Some(Tier::Guideline)) => {
                        return Err("strict rule cannot use the guideline tier".to_string())
                    }
                    (RuleList::Strict, Some(t)) => *t,
                    (RuleList::Strict, None) => default_tier,
                };
                if let Some(severity) = severity {
                    if *severity != tier.severity() {
                        return Err(format!(
                            "{} tier rules have {} severity, not {}",
                            tier,
                            tier.severity(),
                            severity
                        ));
                    }
                }

                let rule = match (pattern, one_of.is_empty()) {
                    (Some(_), false) => {
                        return Err("rule sets both `pattern` and `one_of`".to_string())
                    }
                    (Some(p), true) => Rule::pattern(p, tier),
                    (None, false) => Rule::one_of(one_of, tier),
                    (None, true) => {
                        return Err("rule needs a `pattern` or a non-empty `one_of`".to_string())
                    }
                }
                .map_err(|e| e.to_string())?;

                Ok(match description {
                    Some(d) => rule.with_description(d.clone()),
                    None => rule,
                })
            }
        }
    }
}

/// Structural requirements written as named fields instead of raw patterns.
///
/// Each entry compiles to an architectural-tier strict rule.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArchitectureSpec {
    pub base_class: Option<String>,
    pub methods: Vec<String>,
    pub imports: Vec<String>,
    pub immutable: bool,
}

impl ArchitectureSpec {
    pub fn compile(&self) -> Result<Vec<Rule>, String> {
        let mut rules = vec![];
        let tier = Tier::Architectural;

        if let Some(base) = &self.base_class {
            let pattern = format!(r"class\s+\w+\s*\([^)]*\b{}\b", regex::escape(base));
            rules.push(
                Rule::pattern(&pattern, tier)
                    .map_err(|e| e.to_string())?
                    .with_description(format!("Class must inherit from `{}`", base)),
            );
        }

        for method in &self.methods {
            let pattern = format!(r"def\s+{}\s*\(", regex::escape(method));
            rules.push(
                Rule::pattern(&pattern, tier)
                    .map_err(|e| e.to_string())?
                    .with_description(format!("Missing required method `{}`", method)),
            );
        }

        for import in &self.imports {
            let pattern = format!(r"(?m)^\s*{}", regex::escape(import.trim()));
            rules.push(
                Rule::pattern(&pattern, tier)
                    .map_err(|e| e.to_string())?
                    .with_description(format!("Missing required import `{}`", import.trim())),
            );
        }

        if self.immutable {
            rules.push(
                Rule::pattern(r"frozen\s*=\s*True", tier)
                    .map_err(|e| e.to_string())?
                    .with_description("Artifact must be immutable (`frozen=True`)"),
            );
        }

        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_rule_matches_anywhere() {
        let rule = Rule::pattern(r"class \w+Worker\b", Tier::Format).unwrap();
        assert!(rule.is_satisfied("class FooWorker(BaseWorker):\n"));
        assert!(!rule.is_satisfied("class Foo:\n"));
        assert_eq!(rule.severity, Severity::Error);
        assert!(rule.description.contains("Worker"));
    }

    #[test]
    fn test_scaffold_group_any_member() {
        let rule = Rule::one_of(&["^import a", "^from a import"], Tier::Format).unwrap();
        assert!(rule.is_satisfied("from a import b"));
        assert!(!rule.is_satisfied("import b"));
        assert_eq!(rule.patterns().len(), 2);
    }

    #[test]
    fn test_malformed_pattern_fails_compile() {
        let spec = RuleSpec::Bare("def (".to_string());
        assert!(spec.compile(RuleList::Strict, Tier::Format).is_err());
    }

    #[test]
    fn test_guideline_rules_are_warnings() {
        let spec = RuleSpec::Bare("\"\"\"".to_string());
        let rule = spec.compile(RuleList::Guideline, Tier::Format).unwrap();
        assert_eq!(rule.tier, Tier::Guideline);
        assert_eq!(rule.severity, Severity::Warning);
    }

    #[test]
    fn test_conflicting_severity_refused() {
        let spec = RuleSpec::Detailed {
            pattern: Some("x".into()),
            one_of: vec![],
            description: None,
            severity: Some(Severity::Warning),
            tier: None,
        };
        assert!(spec.compile(RuleList::Strict, Tier::Format).is_err());
    }

    #[test]
    fn test_detailed_rule_needs_a_pattern() {
        let spec = RuleSpec::Detailed {
            pattern: None,
            one_of: vec![],
            description: Some("nothing".into()),
            severity: None,
            tier: Some(Tier::Architectural),
        };
        assert!(spec.compile(RuleList::Strict, Tier::Format).is_err());
    }

    #[test]
    fn test_architecture_spec_compiles_escaped_patterns() {
        let spec = ArchitectureSpec {
            base_class: Some("BaseWorker".into()),
            methods: vec!["execute".into()],
            imports: vec!["from core.base import BaseWorker".into()],
            immutable: true,
        };
        let rules = spec.compile().unwrap();
        assert_eq!(rules.len(), 4);
        assert!(rules.iter().all(|r| r.tier == Tier::Architectural));

        let content = "from core.base import BaseWorker\n\n@dataclass(frozen=True)\nclass FooWorker(BaseWorker):\n    async def execute(self): pass\n";
        assert!(rules.iter().all(|r| r.is_satisfied(content)));
        assert!(!rules[0].is_satisfied("class FooWorker(Other):"));
    }
}
