// src/cli.rs

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Generate, run, deploy and health-check code from a plain-language
/// requirement.
///
/// Settings come from the environment (and `.env`). `--config` adds a YAML
/// file of defaults underneath.
#[derive(Parser, Debug)]
#[command(name = "gptbuilder", version, disable_help_subcommand = true)]
pub struct Cli {
    /// Optional YAML config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging (overrides LOG_LEVEL)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format for results
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Simple)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    Simple,
    /// One JSON document
    Json,
    /// Indented JSON
    Pretty,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Generate code for a requirement.
    Generate {
        requirement: String,

        #[arg(short, long, default_value = "python")]
        language: String,

        /// Extra context appended to the prompt
        #[arg(long)]
        context: Option<String>,

        /// Write the code here instead of printing it
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rewrite existing code according to feedback.
    Refine {
        code_file: PathBuf,

        feedback: String,

        #[arg(short, long, default_value = "python")]
        language: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate unit tests for existing code.
    GenerateTests {
        code_file: PathBuf,

        #[arg(short, long, default_value = "python")]
        language: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Execute a source file.
    ///
    /// Exits non-zero when the code fails or times out.
    Execute {
        code_file: PathBuf,

        #[arg(short, long, default_value = "python")]
        language: String,

        /// Run on the host even if containers are enabled
        #[arg(long)]
        no_docker: bool,

        /// Extra environment variable for the code (KEY=VALUE, repeatable)
        #[arg(long = "env", value_parser = parse_env_pair)]
        env: Vec<(String, String)>,

        /// Arguments passed to the program (after `--`)
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Deploy a source file.
    Deploy {
        code_file: PathBuf,

        name: String,

        #[arg(short, long, default_value = "python")]
        language: String,

        /// local | git (defaults to DEPLOY_PROVIDER)
        #[arg(short, long)]
        provider: Option<String>,

        /// Working tree to commit into (git provider)
        #[arg(long)]
        repo: Option<PathBuf>,

        /// Remote branch to push to (git provider)
        #[arg(long, default_value = "main")]
        branch: String,
    },

    /// List deployments under DEPLOY_PATH.
    ListDeployments,

    /// Remove a deployment by directory name.
    DeleteDeployment { name: String },

    /// Health-check a deployment directory.
    Monitor {
        deployment_path: PathBuf,

        /// Print a maintenance report after the check
        #[arg(long)]
        report: bool,
    },

    /// Count errors and warnings in a log file.
    AnalyzeLogs { log_file: PathBuf },

    /// Generate, execute, deploy and health-check in one go.
    Auto {
        requirement: String,

        #[arg(short, long, default_value = "python")]
        language: String,

        /// Deployment name
        #[arg(short, long)]
        name: String,

        /// Deploy without executing first
        #[arg(long)]
        no_execute: bool,

        #[arg(long)]
        context: Option<String>,
    },

    /// Validate the resolved configuration.
    CheckConfig,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got {raw:?}")),
    }
}
