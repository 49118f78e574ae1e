//! Scaffold Gate - Template-Driven Validation and Gated Writes
//!
//! # The Rules of the Gate
//! 1. Templates Are Contracts
//! 2. Rules Compile at Load, Never at First Use
//! 3. Format and Architecture Fail Fast
//! 4. Guidelines Advise, Never Block
//! 5. Every Write Is Validated After the Edit
//! 6. Same-Path Edits Never Interleave

pub mod analyzer;
pub mod config;
pub mod diff;
pub mod edit;
pub mod error;
pub mod hashing;
pub mod locks;
pub mod pipeline;
pub mod registry;
pub mod rules;
pub mod templates;
pub mod tiered;
pub mod validation;

pub use analyzer::TemplateAnalyzer;
pub use config::EngineConfig;
pub use diff::unified_diff;
pub use edit::{apply_edit, EditRequest, LineEdit, SearchReplace};
pub use error::{EngineError, Result};
pub use pipeline::{EditOutcome, EditPipeline, WriteMode};
pub use registry::ValidatorRegistry;
pub use rules::{Rule, RuleKind, Severity, Tier};
pub use templates::{merge_metadata, Enforcement, Level, TemplateMetadata};
pub use tiered::TieredValidator;
pub use validation::{ValidationIssue, ValidationResult, Validator};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
