//! Edit Pipeline - Single Entry Point for Writes
//!
//! CRITICAL: execute MUST validate the post-edit content before deciding
//! whether to write. No bypass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::analyzer::TemplateAnalyzer;
use crate::config::EngineConfig;
use crate::diff::{diff_stats, unified_diff};
use crate::edit::{apply_edit, EditRequest};
use crate::error::{EngineError, Result};
use crate::hashing::{compute_request_hash, content_hash};
use crate::locks::PathLocks;
use crate::registry::ValidatorRegistry;
use crate::validation::ValidationResult;
use crate::ENGINE_VERSION;

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static VALIDATION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_validation_call_count() -> u32 {
    VALIDATION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_validation_call_count() {
    VALIDATION_CALL_COUNT.store(0, Ordering::SeqCst);
}

/// How validation failures affect the write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Write only if every validator passes; a no-op search/replace fails.
    #[default]
    Strict,
    /// Always write; issues are reported alongside.
    Interactive,
    /// Never write; report what would happen.
    VerifyOnly,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteMode::Strict => write!(f, "strict"),
            WriteMode::Interactive => write!(f, "interactive"),
            WriteMode::VerifyOnly => write!(f, "verify_only"),
        }
    }
}

impl std::str::FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "strict" => Ok(WriteMode::Strict),
            "interactive" => Ok(WriteMode::Interactive),
            "verify_only" | "verify" => Ok(WriteMode::VerifyOnly),
            _ => Err(format!("Invalid write mode: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EditOutcome {
    pub id: String,
    pub path: PathBuf,
    pub mode: WriteMode,
    pub request_kind: String,
    pub diff: String,
    pub result: ValidationResult,
    pub validators: Vec<String>,
    pub written: bool,
    pub created: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacements: Option<usize>,
    pub before_hash: Option<String>,
    pub after_hash: String,
    pub request_hash: String,
    pub completed_at: DateTime<Utc>,
}

impl EditOutcome {
    pub fn summary(&self) -> String {
        let (added, removed) = diff_stats(&self.diff);
        let action = match (self.written, self.created) {
            (true, true) => "created",
            (true, false) => "wrote",
            (false, _) => "verified",
        };
        let mut lines = vec![format!(
            "{} {} (+{} -{}), {}",
            action,
            self.path.display(),
            added,
            removed,
            self.result.summary().lines().next().unwrap_or_default()
        )];
        lines.extend(self.result.issues.iter().map(|i| format!("  {}", i)));
        lines.join("\n")
    }
}

/// The edit pipeline - single entry point for validated writes
pub struct EditPipeline {
    registry: Arc<ValidatorRegistry>,
    locks: PathLocks,
}

impl EditPipeline {
    pub fn new(registry: Arc<ValidatorRegistry>) -> Self {
        Self {
            registry,
            locks: PathLocks::new(),
        }
    }

    /// Bootstrap the registry from configuration and wrap it in a pipeline.
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.check()?;
        let analyzer = TemplateAnalyzer::from_config(config);
        let registry = ValidatorRegistry::bootstrap(config, &analyzer)?;
        Ok(Self::new(Arc::new(registry)))
    }

    pub fn registry(&self) -> &ValidatorRegistry {
        &self.registry
    }

    /// Validate content (or the file on disk) with every applicable validator.
    ///
    /// This is the ONLY validation entry point.
    pub fn validate(&self, path: &Path, content: Option<&str>) -> ValidationResult {
        self.run_validators(path, content).0
    }

    fn run_validators(
        &self,
        path: &Path,
        content: Option<&str>,
    ) -> (ValidationResult, Vec<String>) {
        #[cfg(feature = "test-hooks")]
        VALIDATION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

        let validators = self.registry.get_validators(path);
        let names = validators.iter().map(|v| v.name().to_string()).collect();
        let result =
            ValidationResult::combine(validators.iter().map(|v| v.validate(path, content)));
        (result, names)
    }

    /// Apply an edit to `path`, validate the result, and write it if `mode`
    /// allows.
    ///
    /// CRITICAL: This ALWAYS validates the post-edit content. Calls for the
    /// same path run one at a time, in arrival order.
    pub fn execute(
        &self,
        path: &Path,
        request: &EditRequest,
        mode: WriteMode,
    ) -> Result<EditOutcome> {
        let _guard = self.locks.acquire(path);

        let original = match fs::read_to_string(path) {
            Ok(content) => Some(content),
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(source) => {
                return Err(EngineError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        if original.is_none() && !request.can_create() {
            return Err(EngineError::MissingFile(path.to_path_buf()));
        }

        let before = original.as_deref().unwrap_or("");
        let applied = apply_edit(before, request)?;
        let diff = unified_diff(&path.to_string_lossy(), before, &applied.content);

        // MANDATORY: validation of the new content is non-negotiable.
        let (result, validators) = self.run_validators(path, Some(&applied.content));

        let mut outcome = EditOutcome {
            id: Uuid::new_v4().to_string(),
            path: path.to_path_buf(),
            mode,
            request_kind: request.kind().to_string(),
            diff,
            result,
            validators,
            written: false,
            created: original.is_none(),
            replacements: applied.replacements,
            before_hash: content_hash(original.as_deref()),
            after_hash: content_hash(Some(&applied.content)).unwrap_or_default(),
            request_hash: compute_request_hash(&path.to_string_lossy(), request, ENGINE_VERSION)?,
            completed_at: Utc::now(),
        };

        match mode {
            WriteMode::VerifyOnly => {
                tracing::info!(
                    "verified {} edit to {}: passed={}",
                    outcome.request_kind,
                    path.display(),
                    outcome.result.passed
                );
                return Ok(outcome);
            }
            WriteMode::Strict if applied.replacements == Some(0) => {
                tracing::warn!("rejected no-op search/replace on {}", path.display());
                return Err(EngineError::NoOpRejected {
                    path: path.to_path_buf(),
                    diff: outcome.diff,
                });
            }
            WriteMode::Strict if !outcome.result.passed => {
                tracing::warn!(
                    "rejected edit to {}: {} errors",
                    path.display(),
                    outcome.result.errors().count()
                );
                return Err(EngineError::ValidationRejected {
                    path: path.to_path_buf(),
                    diff: outcome.diff,
                    result: outcome.result,
                });
            }
            WriteMode::Strict | WriteMode::Interactive => {}
        }

        write_content(path, &applied.content)?;
        outcome.written = true;
        outcome.completed_at = Utc::now();

        if outcome.result.issues.is_empty() {
            tracing::info!("wrote {}", path.display());
        } else {
            tracing::warn!(
                "wrote {} with {} issues (mode {})",
                path.display(),
                outcome.result.issues.len(),
                mode
            );
        }
        Ok(outcome)
    }
}

fn write_content(path: &Path, content: &str) -> Result<()> {
    let write_err = |source: std::io::Error| EngineError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(write_err)?;
    }
    fs::write(path, content).map_err(write_err)
}

impl Default for EditPipeline {
    fn default() -> Self {
        Self::new(Arc::new(ValidatorRegistry::default()))
    }
}
