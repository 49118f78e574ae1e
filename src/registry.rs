//! Validator Registry - path to validator dispatch
//!
//! Populated once at bootstrap, then only read. Share it behind an `Arc`.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::analyzer::TemplateAnalyzer;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::tiered::TieredValidator;
use crate::validation::{CommandValidator, JsonSyntaxValidator, Validator, YamlSyntaxValidator};

pub type ValidatorFactory = Arc<dyn Fn() -> Box<dyn Validator> + Send + Sync>;

#[derive(Default)]
pub struct ValidatorRegistry {
    extension_map: HashMap<String, ValidatorFactory>,
    pattern_map: Vec<(Regex, Arc<dyn Validator>)>,
}

fn normalize_extension(extension: &str) -> String {
    extension.trim_start_matches('.').to_string()
}

impl ValidatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry described by `config`.
    ///
    /// Pattern validators are tiered validators, so their templates are
    /// loaded (and their rules compiled) here.
    pub fn bootstrap(config: &EngineConfig, analyzer: &TemplateAnalyzer) -> Result<Self> {
        let mut registry = Self::new();

        if config.builtin_syntax_validators {
            registry.register("json", || Box::new(JsonSyntaxValidator));
            registry.register("yaml", || Box::new(YamlSyntaxValidator));
            registry.register("yml", || Box::new(YamlSyntaxValidator));
        }

        for command in &config.extension_commands {
            let validator = CommandValidator::new(&command.program, command.args.clone());
            registry.register(&command.extension, move || Box::new(validator.clone()));
        }

        for entry in &config.pattern_validators {
            let validator = TieredValidator::with_options(
                &entry.artifact_type,
                analyzer,
                config.require_templates,
            )?;
            registry.register_pattern(&entry.pattern, Arc::new(validator))?;
        }

        tracing::info!(
            "validator registry ready: {} extensions, {} patterns",
            registry.extension_map.len(),
            registry.pattern_map.len()
        );
        Ok(registry)
    }

    /// Register a factory for an exact extension, replacing any earlier one.
    pub fn register<F>(&mut self, extension: &str, factory: F)
    where
        F: Fn() -> Box<dyn Validator> + Send + Sync + 'static,
    {
        let extension = normalize_extension(extension);
        if self
            .extension_map
            .insert(extension.clone(), Arc::new(factory))
            .is_some()
        {
            tracing::debug!("replaced validator for .{}", extension);
        }
    }

    /// Register a shared validator for every path the pattern matches.
    pub fn register_pattern(&mut self, pattern: &str, validator: Arc<dyn Validator>) -> Result<()> {
        let regex = Regex::new(pattern).map_err(|e| EngineError::Pattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })?;
        self.pattern_map.push((regex, validator));
        Ok(())
    }

    /// Validators for a path: the extension validator first, then every
    /// matching pattern validator in registration order.
    pub fn get_validators(&self, path: &Path) -> Vec<Arc<dyn Validator>> {
        let mut validators: Vec<Arc<dyn Validator>> = vec![];

        if let Some(factory) = path
            .extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| self.extension_map.get(ext))
        {
            validators.push(Arc::from(factory()));
        }

        let path_text = path.to_string_lossy().replace('\\', "/");
        validators.extend(
            self.pattern_map
                .iter()
                .filter(|(regex, _)| regex.is_match(&path_text))
                .map(|(_, validator)| Arc::clone(validator)),
        );
        validators
    }

    pub fn len(&self) -> usize {
        self.extension_map.len() + self.pattern_map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.extension_map.clear();
        self.pattern_map.clear();
    }
}
