//! Scaffold Gate CLI - Bridge interface for editing tools
//!
//! Commands: validate, edit, rules
//! Outputs JSON to stdout, logs to stderr
//! Returns 2 on validation failure or rejection, 1 on other errors

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use scaffold_gate::{
    EditPipeline, EditRequest, EngineConfig, EngineError, TemplateAnalyzer, TieredValidator,
    WriteMode,
};

#[derive(Parser)]
#[command(name = "scaffold-gate-cli")]
#[command(about = "Scaffold Gate CLI - template-driven validation and gated writes")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to a JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the templates directory
    #[arg(short, long)]
    templates_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a file, or candidate content for it
    Validate {
        /// Target path (selects the validators)
        #[arg(short, long)]
        path: PathBuf,

        /// Candidate content; the file on disk is used when omitted
        #[arg(long)]
        content: Option<String>,
    },

    /// Apply an edit through the validation gate
    Edit {
        /// Target path
        #[arg(short, long)]
        path: PathBuf,

        /// strict, interactive, or verify-only (defaults to the config)
        #[arg(short, long)]
        mode: Option<WriteMode>,

        /// JSON payload (EditRequest)
        #[arg(short, long)]
        request: String,
    },

    /// Show the effective rules for an artifact type
    Rules {
        /// Artifact type identifier
        #[arg(short, long)]
        artifact_type: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("scaffold_gate=debug,scaffold_gate_cli=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => match EngineConfig::load(path) {
            Ok(c) => c,
            Err(e) => return fail(&e.to_string()),
        },
        None => EngineConfig::default(),
    };
    if let Some(dir) = cli.templates_dir {
        config.template_root = dir;
    }

    match cli.command {
        Commands::Validate { path, content } => {
            let pipeline = match EditPipeline::from_config(&config) {
                Ok(p) => p,
                Err(e) => return fail(&e.to_string()),
            };

            let result = pipeline.validate(&path, content.as_deref());
            print_json(&serde_json::json!({
                "path": path,
                "result": result,
            }));
            if result.passed {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(2) // Validation failure
            }
        }

        Commands::Edit {
            path,
            mode,
            request,
        } => {
            let request: EditRequest = match serde_json::from_str(&request) {
                Ok(r) => r,
                Err(e) => return fail(&format!("Invalid request: {}", e)),
            };
            let pipeline = match EditPipeline::from_config(&config) {
                Ok(p) => p,
                Err(e) => return fail(&e.to_string()),
            };

            let mode = mode.unwrap_or(config.default_mode);
            match pipeline.execute(&path, &request, mode) {
                Ok(outcome) => {
                    eprintln!("{}", outcome.summary());
                    print_json(&serde_json::json!({
                        "success": true,
                        "outcome": outcome,
                    }));
                    ExitCode::SUCCESS
                }
                Err(e) => {
                    let result = match &e {
                        EngineError::ValidationRejected { result, .. } => Some(result),
                        _ => None,
                    };
                    print_json(&serde_json::json!({
                        "success": false,
                        "error": e.to_string(),
                        "diff": e.diff(),
                        "result": result,
                    }));
                    if e.is_rejection() {
                        ExitCode::from(2) // Rejected by policy
                    } else {
                        ExitCode::FAILURE
                    }
                }
            }
        }

        Commands::Rules { artifact_type } => {
            let analyzer = TemplateAnalyzer::from_config(&config);
            let validator = match TieredValidator::new(&artifact_type, &analyzer) {
                Ok(v) => v,
                Err(e) => return fail(&e.to_string()),
            };
            let chain = match validator.template() {
                Some(template) => match analyzer.get_inheritance_chain(template) {
                    Ok(chain) => chain,
                    Err(e) => return fail(&e.to_string()),
                },
                None => vec![],
            };

            print_json(&serde_json::json!({
                "artifact_type": artifact_type,
                "template": validator.template(),
                "chain": chain,
                "rules": validator.effective_rules(),
            }));
            ExitCode::SUCCESS
        }
    }
}

fn print_json(value: &serde_json::Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("failed to encode output: {}", e),
    }
}

fn fail(message: &str) -> ExitCode {
    print_json(&serde_json::json!({
        "success": false,
        "error": message,
    }));
    ExitCode::FAILURE
}
