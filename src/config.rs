//! Engine Configuration
//!
//! Loaded from a JSON file; every field has a default so an empty object
//! (or no file at all) is a working configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::analyzer::DEFAULT_TEMPLATE_EXTENSIONS;
use crate::error::{EngineError, Result};
use crate::pipeline::WriteMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_template_root")]
    pub template_root: PathBuf,
    #[serde(default = "default_template_extensions")]
    pub template_extensions: Vec<String>,
    /// Refuse artifact types that have no template instead of passing them.
    #[serde(default = "default_true")]
    pub require_templates: bool,
    #[serde(default)]
    pub default_mode: WriteMode,
    #[serde(default = "default_true")]
    pub builtin_syntax_validators: bool,
    #[serde(default)]
    pub pattern_validators: Vec<PatternValidatorConfig>,
    #[serde(default)]
    pub extension_commands: Vec<CommandConfig>,
}

fn default_true() -> bool { true }

fn default_template_root() -> PathBuf { PathBuf::from("templates") }

fn default_template_extensions() -> Vec<String> {
    DEFAULT_TEMPLATE_EXTENSIONS.iter().map(|e| e.to_string()).collect()
}

/// Paths matching `pattern` are checked against `artifactType`'s template.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternValidatorConfig {
    pub pattern: String,
    pub artifact_type: String,
}

/// External tool run for every file with `extension`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    pub extension: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            template_root: default_template_root(),
            template_extensions: default_template_extensions(),
            require_templates: true,
            default_mode: WriteMode::default(),
            builtin_syntax_validators: true,
            pattern_validators: vec![],
            extension_commands: vec![],
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|source| EngineError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
        config.check()?;
        Ok(config)
    }

    /// Reject configuration that could only fail later.
    pub fn check(&self) -> Result<()> {
        if self.template_extensions.is_empty() {
            return Err(EngineError::Config(
                "templateExtensions must not be empty".to_string(),
            ));
        }
        for entry in &self.pattern_validators {
            regex::Regex::new(&entry.pattern).map_err(|e| {
                EngineError::Config(format!("pattern '{}': {}", entry.pattern, e))
            })?;
        }
        if let Some(cmd) = self.extension_commands.iter().find(|c| c.program.trim().is_empty()) {
            return Err(EngineError::Config(format!(
                "command for .{} has no program",
                cmd.extension.trim_start_matches('.')
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_empty_object_is_default() {
        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.template_root, PathBuf::from("templates"));
        assert!(config.require_templates);
        assert!(config.builtin_syntax_validators);
        assert_eq!(config.default_mode, WriteMode::Strict);
        assert_eq!(config.template_extensions, vec!["j2", "jinja", "jinja2"]);
    }

    #[test]
    fn test_load_full_config() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gate.json");
        fs::write(
            &path,
            r#"{
                "templateRoot": "tpl",
                "requireTemplates": false,
                "defaultMode": "interactive",
                "patternValidators": [{"pattern": "workers/.*\\.py$", "artifactType": "worker"}],
                "extensionCommands": [{"extension": "py", "program": "ruff", "args": ["check", "-"]}]
            }"#,
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.template_root, PathBuf::from("tpl"));
        assert!(!config.require_templates);
        assert_eq!(config.default_mode, WriteMode::Interactive);
        assert_eq!(config.pattern_validators[0].artifact_type, "worker");
        assert_eq!(config.extension_commands[0].args, vec!["check", "-"]);
    }

    #[test]
    fn test_bad_pattern_rejected_at_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("gate.json");
        fs::write(
            &path,
            r#"{"patternValidators": [{"pattern": "(", "artifactType": "x"}]}"#,
        )
        .unwrap();
        assert!(matches!(
            EngineConfig::load(&path),
            Err(EngineError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = EngineConfig::load(Path::new("/nonexistent/gate.json")).unwrap_err();
        assert!(matches!(err, EngineError::Read { .. }));
    }
}
