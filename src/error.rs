//! Error taxonomy for the engine
//!
//! Construction-time failures (read, bounds, overlap, pattern) abort before
//! any validation or write. Rejections carry the diff preview so callers can
//! see what would have changed.

use std::path::PathBuf;
use thiserror::Error;

use crate::validation::ValidationResult;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed template metadata in {}: {message}", .template.display())]
    TemplateMetadataMalformed { template: PathBuf, message: String },

    #[error("Invalid rule in {}: {message}", .template.display())]
    InvalidRule { template: PathBuf, message: String },

    #[error("No template found for artifact type '{0}'")]
    UnknownArtifactType(String),

    #[error("Line range {start}-{end} is outside the file (1-{line_count})")]
    Bounds {
        start: usize,
        end: usize,
        line_count: usize,
    },

    #[error("Line ranges {first_start}-{first_end} and {second_start}-{second_end} overlap")]
    Overlap {
        first_start: usize,
        first_end: usize,
        second_start: usize,
        second_end: usize,
    },

    #[error("Invalid search pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },

    #[error("File does not exist: {} (only a full rewrite can create a file)", .0.display())]
    MissingFile(PathBuf),

    #[error("Validation rejected edit to {}:\n{}", .path.display(), .result.summary())]
    ValidationRejected {
        path: PathBuf,
        diff: String,
        result: ValidationResult,
    },

    #[error("Search/replace on {} matched nothing", .path.display())]
    NoOpRejected { path: PathBuf, diff: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    /// Diff preview attached to a rejection, if any.
    pub fn diff(&self) -> Option<&str> {
        match self {
            EngineError::ValidationRejected { diff, .. }
            | EngineError::NoOpRejected { diff, .. } => Some(diff),
            _ => None,
        }
    }

    /// True for errors that represent a policy refusal rather than a failure.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            EngineError::ValidationRejected { .. } | EngineError::NoOpRejected { .. }
        )
    }
}
