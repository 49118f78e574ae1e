//! Template Analyzer - loads template metadata and resolves inheritance
//!
//! Metadata and inheritance chains are cached per resolved path. Both caches
//! only grow, so concurrent validators can share one analyzer.

use dashmap::DashMap;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::templates::{
    find_extends, find_metadata_block, free_variables, merge_metadata, parse_metadata_block,
    TemplateMetadata,
};

pub const DEFAULT_TEMPLATE_EXTENSIONS: &[&str] = &["j2", "jinja", "jinja2"];

pub struct TemplateAnalyzer {
    root: PathBuf,
    extensions: Vec<String>,
    metadata_cache: DashMap<PathBuf, Arc<TemplateMetadata>>,
    chain_cache: DashMap<PathBuf, Arc<Vec<PathBuf>>>,
}

impl TemplateAnalyzer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: DEFAULT_TEMPLATE_EXTENSIONS
                .iter()
                .map(|e| e.to_string())
                .collect(),
            metadata_cache: DashMap::new(),
            chain_cache: DashMap::new(),
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(&config.template_root).with_extensions(config.template_extensions.clone())
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_string())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a template reference against the template root.
    pub fn resolve(&self, template_ref: &Path) -> PathBuf {
        let joined = if template_ref.is_absolute() {
            template_ref.to_path_buf()
        } else {
            self.root.join(template_ref)
        };
        fs::canonicalize(&joined).unwrap_or(joined)
    }

    fn read_source(path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| EngineError::Read {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse the metadata block of one template (no inheritance).
    ///
    /// A template without a metadata block yields empty metadata.
    pub fn extract_metadata(
        &self,
        template_ref: impl AsRef<Path>,
    ) -> Result<Arc<TemplateMetadata>> {
        let path = self.resolve(template_ref.as_ref());
        if let Some(cached) = self.metadata_cache.get(&path) {
            tracing::debug!("metadata cache hit: {}", path.display());
            return Ok(Arc::clone(&cached));
        }

        let source = Self::read_source(&path)?;
        let mut metadata = match find_metadata_block(&source) {
            Some(body) => parse_metadata_block(&body)
                .map_err(|message| EngineError::TemplateMetadataMalformed {
                    template: path.clone(),
                    message,
                })?
                .compile()
                .map_err(|message| EngineError::InvalidRule {
                    template: path.clone(),
                    message,
                })?,
            None => TemplateMetadata::default(),
        };
        if metadata.extends.is_none() {
            metadata.extends = find_extends(&source);
        }
        metadata.variables = free_variables(&source);

        tracing::debug!(
            "loaded {} rules from {}",
            metadata.rule_count(),
            path.display()
        );
        let metadata = Arc::new(metadata);
        self.metadata_cache.insert(path, Arc::clone(&metadata));
        Ok(metadata)
    }

    /// Template this one extends, if the reference resolves to a file.
    ///
    /// A metadata `extends` overrides the directive. A reference to a missing
    /// file is treated as "no base" and logged.
    pub fn get_base_template(&self, template_ref: impl AsRef<Path>) -> Result<Option<PathBuf>> {
        let path = self.resolve(template_ref.as_ref());
        let reference = match self.extract_metadata(&path)?.extends.clone() {
            Some(r) => r,
            None => return Ok(None),
        };

        let base = self.resolve(Path::new(&reference));
        if !base.is_file() {
            tracing::warn!(
                "{} extends '{}', which does not exist; treating as no base",
                path.display(),
                reference
            );
            return Ok(None);
        }
        Ok(Some(base))
    }

    /// The template followed by each ancestor, most specific first.
    ///
    /// Stops at a template with no base or at a reference already visited.
    pub fn get_inheritance_chain(&self, template_ref: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let start = self.resolve(template_ref.as_ref());
        if let Some(cached) = self.chain_cache.get(&start) {
            return Ok(Vec::clone(&cached));
        }

        let mut chain = vec![start.clone()];
        let mut visited: HashSet<PathBuf> = HashSet::from([start.clone()]);
        let mut current = start.clone();

        while let Some(base) = self.get_base_template(&current)? {
            if !visited.insert(base.clone()) {
                tracing::warn!(
                    "inheritance cycle: {} extends already visited {}",
                    current.display(),
                    base.display()
                );
                break;
            }
            chain.push(base.clone());
            current = base;
        }

        self.chain_cache.insert(start, Arc::new(chain.clone()));
        Ok(chain)
    }

    /// Metadata folded over the whole chain, base first.
    pub fn effective_metadata(&self, template_ref: impl AsRef<Path>) -> Result<TemplateMetadata> {
        let chain = self.get_inheritance_chain(template_ref)?;
        let mut effective = TemplateMetadata::default();
        for template in chain.iter().rev() {
            let metadata = self.extract_metadata(template)?;
            effective = merge_metadata(&metadata, &effective);
        }
        Ok(effective)
    }

    /// Find the template for an artifact type.
    ///
    /// Matches files whose name starts with `<artifact_type>.` and carries a
    /// template extension; the shallowest match wins.
    pub fn locate_template(&self, artifact_type: &str) -> Option<PathBuf> {
        WalkDir::new(&self.root)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                let name = entry.file_name().to_string_lossy();
                let stem_matches = name.split('.').next() == Some(artifact_type);
                let ext_matches = entry
                    .path()
                    .extension()
                    .map(|ext| self.extensions.iter().any(|e| ext == e.as_str()))
                    .unwrap_or(false);
                stem_matches && ext_matches
            })
            .min_by_key(|entry| entry.depth())
            .map(|entry| self.resolve(entry.path()))
    }

    pub fn clear_cache(&self) {
        self.metadata_cache.clear();
        self.chain_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_template_without_block_has_no_rules() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "plain.j2", "hello {{ name }}\n");
        let analyzer = TemplateAnalyzer::new(dir.path());

        let meta = analyzer.extract_metadata("plain.j2").unwrap();
        assert_eq!(meta.rule_count(), 0);
        assert!(meta.variables.contains("name"));
    }

    #[test]
    fn test_malformed_metadata_is_surfaced() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "bad.j2", "{# validation: [oops #}\n");
        let analyzer = TemplateAnalyzer::new(dir.path());

        let err = analyzer.extract_metadata("bad.j2").unwrap_err();
        assert!(matches!(err, EngineError::TemplateMetadataMalformed { .. }));
    }

    #[test]
    fn test_bad_pattern_fails_at_load() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "bad.j2",
            "{#\nvalidation:\n  strict_rules: ['def (']\n#}\n",
        );
        let analyzer = TemplateAnalyzer::new(dir.path());

        let err = analyzer.extract_metadata("bad.j2").unwrap_err();
        assert!(matches!(err, EngineError::InvalidRule { .. }));
    }

    #[test]
    fn test_missing_base_is_no_base() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "child.j2", "{% extends \"gone.j2\" %}\n");
        let analyzer = TemplateAnalyzer::new(dir.path());

        assert!(analyzer.get_base_template("child.j2").unwrap().is_none());
        assert_eq!(analyzer.get_inheritance_chain("child.j2").unwrap().len(), 1);
    }

    #[test]
    fn test_metadata_extends_overrides_directive() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.j2", "{#\nvalidation:\n  purpose: A\n#}\n");
        write(dir.path(), "b.j2", "{#\nvalidation:\n  purpose: B\n#}\n");
        write(
            dir.path(),
            "c.j2",
            "{% extends \"a.j2\" %}\n{#\nvalidation:\n  extends: b.j2\n#}\n",
        );
        let analyzer = TemplateAnalyzer::new(dir.path());

        let base = analyzer.get_base_template("c.j2").unwrap().unwrap();
        assert!(base.ends_with("b.j2"));
        let effective = analyzer.effective_metadata("c.j2").unwrap();
        assert_eq!(effective.purpose.as_deref(), Some("B"));
    }

    #[test]
    fn test_chain_stops_on_cycle() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.j2", "{% extends \"b.j2\" %}\n");
        write(dir.path(), "b.j2", "{% extends \"a.j2\" %}\n");
        let analyzer = TemplateAnalyzer::new(dir.path());

        let chain = analyzer.get_inheritance_chain("a.j2").unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain[0].ends_with("a.j2"));
        assert!(chain[1].ends_with("b.j2"));
    }

    #[test]
    fn test_extends_resolves_from_root_not_from_template_dir() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "base/root.j2", "root\n");
        write(
            dir.path(),
            "workers/worker.py.j2",
            "{% extends \"base/root.j2\" %}\n",
        );
        let analyzer = TemplateAnalyzer::new(dir.path());

        let base = analyzer
            .get_base_template("workers/worker.py.j2")
            .unwrap()
            .unwrap();
        assert!(base.ends_with("base/root.j2"));
    }

    #[test]
    fn test_locate_template_prefers_shallowest() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "nested/worker.py.j2", "");
        write(dir.path(), "worker.py.j2", "");
        write(dir.path(), "worker_pool.py.j2", "");
        write(dir.path(), "worker.txt", "");
        let analyzer = TemplateAnalyzer::new(dir.path());

        let found = analyzer.locate_template("worker").unwrap();
        assert_eq!(found, analyzer.resolve(Path::new("worker.py.j2")));
        assert!(analyzer.locate_template("signal").is_none());
    }

    #[test]
    fn test_metadata_cached_until_cleared() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "t.j2", "{#\nvalidation:\n  strict_rules: ['a']\n#}\n");
        let analyzer = TemplateAnalyzer::new(dir.path());
        assert_eq!(analyzer.extract_metadata("t.j2").unwrap().rule_count(), 1);

        write(dir.path(), "t.j2", "no rules\n");
        assert_eq!(analyzer.extract_metadata("t.j2").unwrap().rule_count(), 1);

        analyzer.clear_cache();
        assert_eq!(analyzer.extract_metadata("t.j2").unwrap().rule_count(), 0);
    }
}
