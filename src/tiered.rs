//! Tiered Validator - format, then architectural, then guideline checks
//!
//! Format and architectural tiers fail fast: the first tier that reports
//! anything ends evaluation. Guideline rules are all checked and only warn.

use std::path::{Path, PathBuf};

use crate::analyzer::TemplateAnalyzer;
use crate::error::{EngineError, Result};
use crate::rules::{Rule, Tier};
use crate::templates::TemplateMetadata;
use crate::validation::{load_content, ValidationIssue, ValidationResult, Validator};

#[cfg(test)]
thread_local! {
    static EVALUATED: std::cell::RefCell<Vec<Tier>> = const { std::cell::RefCell::new(Vec::new()) };
}

/// Validator for one artifact type, built from its template chain.
#[derive(Debug, Clone)]
pub struct TieredValidator {
    artifact_type: String,
    template: Option<PathBuf>,
    rules: TemplateMetadata,
}

impl TieredValidator {
    /// Locate the artifact type's template and fold its inheritance chain.
    ///
    /// Fails with `UnknownArtifactType` when no template matches.
    pub fn new(artifact_type: &str, analyzer: &TemplateAnalyzer) -> Result<Self> {
        Self::with_options(artifact_type, analyzer, true)
    }

    /// Like [`TieredValidator::new`], but with `require_template = false` an
    /// unknown artifact type yields a validator with no rules.
    pub fn with_options(
        artifact_type: &str,
        analyzer: &TemplateAnalyzer,
        require_template: bool,
    ) -> Result<Self> {
        let template = match analyzer.locate_template(artifact_type) {
            Some(t) => t,
            None if require_template => {
                return Err(EngineError::UnknownArtifactType(artifact_type.to_string()))
            }
            None => {
                tracing::warn!(
                    "no template for artifact type '{}' under {}; every file will pass",
                    artifact_type,
                    analyzer.root().display()
                );
                return Ok(Self::from_metadata(artifact_type, TemplateMetadata::default()));
            }
        };

        let rules = analyzer.effective_metadata(&template)?;
        tracing::debug!(
            "{} validator: {} strict, {} guideline rules from {}",
            artifact_type,
            rules.strict_rules.len(),
            rules.guideline_rules.len(),
            template.display()
        );

        Ok(Self {
            artifact_type: artifact_type.to_string(),
            template: Some(template),
            rules,
        })
    }

    pub fn from_metadata(artifact_type: &str, rules: TemplateMetadata) -> Self {
        Self {
            artifact_type: artifact_type.to_string(),
            template: None,
            rules,
        }
    }

    pub fn artifact_type(&self) -> &str {
        &self.artifact_type
    }

    pub fn template(&self) -> Option<&Path> {
        self.template.as_deref()
    }

    pub fn effective_rules(&self) -> &TemplateMetadata {
        &self.rules
    }

    /// Run the tiers against content.
    pub fn check(&self, content: &str) -> ValidationResult {
        for tier in [Tier::Format, Tier::Architectural] {
            let issues = self.evaluate_tier(tier, content);
            if !issues.is_empty() {
                return ValidationResult::from_issues(issues);
            }
        }
        ValidationResult::from_issues(self.evaluate_tier(Tier::Guideline, content))
    }

    fn tier_rules(&self, tier: Tier) -> impl Iterator<Item = &Rule> {
        let rules = match tier {
            Tier::Guideline => &self.rules.guideline_rules,
            Tier::Format | Tier::Architectural => &self.rules.strict_rules,
        };
        rules.iter().filter(move |r| r.tier == tier)
    }

    fn evaluate_tier(&self, tier: Tier, content: &str) -> Vec<ValidationIssue> {
        self.tier_rules(tier)
            .filter(|rule| {
                #[cfg(test)]
                EVALUATED.with(|e| e.borrow_mut().push(tier));
                !rule.is_satisfied(content)
            })
            .map(|rule| {
                ValidationIssue::new(rule.severity, &rule.description).with_code(tier.to_string())
            })
            .collect()
    }
}

impl Validator for TieredValidator {
    fn name(&self) -> &str {
        &self.artifact_type
    }

    fn validate(&self, path: &Path, content: Option<&str>) -> ValidationResult {
        let content = match load_content(path, content) {
            Ok(c) => c,
            Err(result) => return result,
        };
        let result = self.check(&content);
        tracing::debug!(
            "{} [{}]: passed={} score={:.1}",
            path.display(),
            self.artifact_type,
            result.passed,
            result.score
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::parse_metadata_block;

    fn validator(block: &str) -> TieredValidator {
        let rules = parse_metadata_block(block).unwrap().compile().unwrap();
        TieredValidator::from_metadata("worker", rules)
    }

    fn take_evaluated() -> Vec<Tier> {
        EVALUATED.with(|e| std::mem::take(&mut *e.borrow_mut()))
    }

    const WORKER_RULES: &str = r#"validation:
  strict_rules:
    - 'class \w+Worker\b'
    - 'def execute\('
"#;

    #[test]
    fn test_conforming_worker_passes() {
        let v = validator(WORKER_RULES);
        let result = v.check("class FooWorker(BaseWorker):\n async def execute(self): pass\n");
        assert!(result.passed);
        assert_eq!(result.score, 10.0);
        assert!(result.issues.is_empty());
    }

    #[test]
    fn test_nonconforming_worker_reports_every_format_issue() {
        let v = validator(WORKER_RULES);
        let result = v.check("class Foo:\n pass\n");
        assert!(!result.passed);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.issues.len(), 2);
        assert!(result.issues.iter().any(|i| i.message.contains("Worker")));
        assert!(result.issues.iter().any(|i| i.message.contains("execute")));
    }

    #[test]
    fn test_format_failure_skips_lower_tiers() {
        let v = validator(
            r#"validation:
  strict_rules:
    - pattern: 'class \w+Worker\b'
      tier: format
    - pattern: 'from core import BaseWorker'
      tier: architectural
  guideline_rules:
    - '"""'
"#,
        );
        take_evaluated();

        let result = v.check("class Foo:\n pass\n");
        assert_eq!(result.issues.len(), 1);
        assert_eq!(take_evaluated(), vec![Tier::Format]);
    }

    #[test]
    fn test_architectural_failure_skips_guidelines() {
        let v = validator(
            r#"validation:
  strict_rules:
    - pattern: 'class'
      tier: format
  architecture:
    base_class: BaseWorker
  guideline_rules:
    - '"""'
"#,
        );
        take_evaluated();

        let result = v.check("class FooWorker(Other):\n pass\n");
        assert!(!result.passed);
        assert_eq!(result.issues[0].code.as_deref(), Some("architectural"));
        assert!(!take_evaluated().contains(&Tier::Guideline));
    }

    #[test]
    fn test_guidelines_only_warn_and_are_all_checked() {
        let v = validator(
            r#"validation:
  guideline_rules:
    - '"""'
    - pattern: 'logger\.'
      description: Workers should log progress
"#,
        );
        let result = v.check("class FooWorker: pass\n");
        assert!(result.passed);
        assert_eq!(result.score, 8.0);
        assert_eq!(result.issues.len(), 2);
        assert!(result.issues.iter().all(|i| i.code.as_deref() == Some("guideline")));
    }

    #[test]
    fn test_scaffold_group_satisfied_by_any_member() {
        let v = validator(
            r#"validation:
  strict_rules:
    - one_of: ['^import json', '^from json import']
"#,
        );
        assert!(v.check("from json import loads\n").passed);
        assert!(!v.check("import yaml\n").passed);
    }

    #[test]
    fn test_unknown_artifact_type() {
        let dir = tempfile::TempDir::new().unwrap();
        let analyzer = TemplateAnalyzer::new(dir.path());

        let err = TieredValidator::new("missing", &analyzer).unwrap_err();
        assert!(matches!(err, EngineError::UnknownArtifactType(_)));

        let lenient = TieredValidator::with_options("missing", &analyzer, false).unwrap();
        assert!(lenient.check("anything").passed);
        assert!(lenient.template().is_none());
    }
}
