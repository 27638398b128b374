// src/config.rs

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, path::PathBuf};

/// Resolved configuration for every pipeline component.
///
/// The environment is the primary source of truth (a `.env` file in the
/// working directory is honoured). An optional YAML file passed with
/// `--config` supplies defaults underneath it.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Credential for the completion backend. `None` means generation is
    /// unavailable; the executor, deployer and monitor still work.
    #[serde(skip_serializing)]
    pub openai_api_key: Option<String>,

    pub openai_model: String,

    pub openai_base_url: String,

    /// Wall-clock limit for one execution, in seconds.
    pub execution_timeout: u64,

    /// Prefer container isolation when a runtime is reachable.
    pub enable_docker: bool,

    /// Disable networking inside containers.
    pub enable_sandboxing: bool,

    pub deploy_path: PathBuf,

    pub deploy_provider: String,

    /// Read but not enforced anywhere.
    pub max_execution_time: u64,

    pub log_level: String,

    pub log_file: Option<PathBuf>,

    pub runtime: Runtime,
}

/// Binaries used to launch code.
///
/// Example in a config file:
///
/// runtime:
///   python: python3
///   node: node
///   docker: docker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Runtime {
    #[serde(default = "default_python")]
    pub python: String,

    #[serde(default = "default_node")]
    pub node: String,

    #[serde(default = "default_docker")]
    pub docker: String,
}

impl Default for Runtime {
    fn default() -> Self {
        Self {
            python: default_python(),
            node: default_node(),
            docker: default_docker(),
        }
    }
}

fn default_python() -> String {
    "python3".to_string()
}

fn default_node() -> String {
    "node".to_string()
}

fn default_docker() -> String {
    "docker".to_string()
}

/// Optional YAML config file. Every key is optional.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    pub openai_api_key: Option<String>,
    pub openai_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub execution_timeout: Option<u64>,
    pub enable_docker: Option<bool>,
    pub enable_sandboxing: Option<bool>,
    pub deploy_path: Option<PathBuf>,
    pub deploy_provider: Option<String>,
    pub max_execution_time: Option<u64>,
    pub log_level: Option<String>,
    pub log_file: Option<PathBuf>,
    pub runtime: Option<Runtime>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let file: ConfigFile =
            serde_yaml::from_str(&raw).context("Failed to parse YAML config")?;

        Ok(file)
    }
}

pub const DEFAULT_MODEL: &str = "gpt-4";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

pub fn default_deploy_path() -> PathBuf {
    std::env::temp_dir().join("gptbuilder_deployments")
}

impl Config {
    /// Load `.env`, the optional config file, and the process environment.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        // Missing .env is the common case
        let _ = dotenvy::dotenv();

        let file = match config_file {
            Some(path) => ConfigFile::load(path)?,
            None => ConfigFile::default(),
        };

        Self::resolve(file, |key| std::env::var(key).ok())
    }

    /// Merge file values with environment lookups (environment wins).
    ///
    /// `lookup` abstracts `std::env::var` so the merge can be exercised
    /// without touching the process environment.
    pub fn resolve<F>(file: ConfigFile, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut runtime = file.runtime.unwrap_or_default();
        if let Some(v) = env("PYTHON_BIN") {
            runtime.python = v;
        }
        if let Some(v) = env("NODE_BIN") {
            runtime.node = v;
        }
        if let Some(v) = env("DOCKER_BIN") {
            runtime.docker = v;
        }

        Ok(Self {
            openai_api_key: env("OPENAI_API_KEY").or(file.openai_api_key),
            openai_model: env("OPENAI_MODEL")
                .or(file.openai_model)
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openai_base_url: env("OPENAI_BASE_URL")
                .or(file.openai_base_url)
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            execution_timeout: parse_u64(env("EXECUTION_TIMEOUT"), "EXECUTION_TIMEOUT")?
                .or(file.execution_timeout)
                .unwrap_or(300),
            enable_docker: env("ENABLE_DOCKER")
                .map(|v| parse_flag(&v))
                .or(file.enable_docker)
                .unwrap_or(true),
            enable_sandboxing: env("ENABLE_SANDBOXING")
                .map(|v| parse_flag(&v))
                .or(file.enable_sandboxing)
                .unwrap_or(true),
            deploy_path: env("DEPLOY_PATH")
                .map(PathBuf::from)
                .or(file.deploy_path)
                .unwrap_or_else(default_deploy_path),
            deploy_provider: env("DEPLOY_PROVIDER")
                .or(file.deploy_provider)
                .unwrap_or_else(|| "local".to_string()),
            max_execution_time: parse_u64(env("MAX_EXECUTION_TIME"), "MAX_EXECUTION_TIME")?
                .or(file.max_execution_time)
                .unwrap_or(600),
            log_level: env("LOG_LEVEL")
                .or(file.log_level)
                .unwrap_or_else(|| "INFO".to_string()),
            log_file: env("LOG_FILE")
                .map(PathBuf::from)
                .or(file.log_file)
                .or_else(|| Some(PathBuf::from("gptbuilder.log"))),
            runtime,
        })
    }
}

/// Flags are on only for the literal (case-insensitive) string `true`.
fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn parse_u64(value: Option<String>, key: &str) -> Result<Option<u64>> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .with_context(|| format!("{key} must be a whole number of seconds, got {v:?}"))
        })
        .transpose()
}
