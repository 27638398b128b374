// src/executor/mod.rs

//! Running untrusted code.
//!
//! Two isolation strategies sit behind one `Executor`:
//! - `local`: a child process on the host
//! - `container`: a throwaway Docker container with a read-only mount
//!
//! Whatever happens (non-zero exit, timeout, spawn failure, container
//! runtime error) the caller gets the same `ExecutionResult` shape back.

mod container;
mod local;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{Config, Runtime};
use crate::language::Language;

/// Return code used for timeouts and internal failures.
pub const INTERNAL_FAILURE_CODE: i32 = -1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub return_code: i32,
    pub success: bool,
}

impl ExecutionResult {
    /// Result of a process that ran to completion.
    ///
    /// A missing exit code (killed by a signal) counts as an internal failure.
    pub fn completed(stdout: String, stderr: String, code: Option<i32>) -> Self {
        let return_code = code.unwrap_or(INTERNAL_FAILURE_CODE);
        Self {
            stdout,
            stderr,
            return_code,
            success: return_code == 0,
        }
    }

    pub fn timed_out(timeout: Duration) -> Self {
        Self::internal_failure(format!(
            "Execution timeout after {} seconds",
            timeout.as_secs()
        ))
    }

    pub fn internal_failure(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            return_code: INTERNAL_FAILURE_CODE,
            success: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    Local,
    Container,
}

/// Construction-time settings for an `Executor`.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub timeout: Duration,
    pub use_container: bool,
    pub sandboxing: bool,
    pub runtime: Runtime,
    /// Where temp files and mount directories are created. Defaults to the
    /// system temp dir.
    pub scratch_dir: Option<PathBuf>,
}

impl ExecutorSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.execution_timeout),
            use_container: cfg.enable_docker,
            sandboxing: cfg.enable_sandboxing,
            runtime: cfg.runtime.clone(),
            scratch_dir: None,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            use_container: true,
            sandboxing: true,
            runtime: Runtime::default(),
            scratch_dir: None,
        }
    }
}

pub struct Executor {
    settings: ExecutorSettings,
    mode: IsolationMode,
    fallback_reason: Option<String>,
}

impl Executor {
    /// Build an executor, probing the container runtime if containers were
    /// requested.
    ///
    /// An unreachable runtime downgrades the executor to local mode for its
    /// whole lifetime. The downgrade is logged and kept in
    /// `fallback_reason()` so callers can report it.
    pub async fn new(settings: ExecutorSettings) -> Self {
        if !settings.use_container {
            return Self::local(settings);
        }

        match container::probe(&settings.runtime.docker).await {
            Ok(()) => {
                tracing::info!(docker = %settings.runtime.docker, "container isolation enabled");
                Self {
                    settings,
                    mode: IsolationMode::Container,
                    fallback_reason: None,
                }
            }
            Err(reason) => {
                tracing::warn!(
                    %reason,
                    "container runtime unavailable; falling back to local execution"
                );
                Self {
                    settings,
                    mode: IsolationMode::Local,
                    fallback_reason: Some(reason),
                }
            }
        }
    }

    /// Local-only executor. Never touches the container runtime.
    pub fn local(settings: ExecutorSettings) -> Self {
        Self {
            settings,
            mode: IsolationMode::Local,
            fallback_reason: None,
        }
    }

    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    /// Why container isolation was requested but not used, if it was.
    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn timeout(&self) -> Duration {
        self.settings.timeout
    }

    pub async fn execute(
        &self,
        code: &str,
        language: Language,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> ExecutionResult {
        tracing::debug!(mode = ?self.mode, language = %language, "executing code");

        let result = match self.mode {
            IsolationMode::Local => local::run(&self.settings, code, language, args, env).await,
            IsolationMode::Container => {
                container::run(&self.settings, code, language, args, env).await
            }
        };

        if result.success {
            tracing::info!(language = %language, "execution succeeded");
        } else {
            tracing::error!(
                language = %language,
                return_code = result.return_code,
                "execution failed"
            );
        }

        result
    }
}

#[cfg(test)]
pub(crate) mod testing {
    /// True when `python3` can be launched on this machine.
    pub fn python_available() -> bool {
        std::process::Command::new("python3")
            .arg("--version")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_tracks_exit_code_exactly() {
        assert!(ExecutionResult::completed(String::new(), String::new(), Some(0)).success);
        assert!(!ExecutionResult::completed(String::new(), String::new(), Some(1)).success);
        assert!(!ExecutionResult::completed(String::new(), String::new(), Some(-3)).success);
    }

    #[test]
    fn missing_exit_code_is_a_failure() {
        let result = ExecutionResult::completed("out".into(), "err".into(), None);
        assert_eq!(result.return_code, INTERNAL_FAILURE_CODE);
        assert!(!result.success);
        assert_eq!(result.stdout, "out");
    }

    #[test]
    fn timeout_result_shape() {
        let result = ExecutionResult::timed_out(Duration::from_secs(5));
        assert_eq!(result.return_code, -1);
        assert!(!result.success);
        assert!(result.stdout.is_empty());
        assert_eq!(result.stderr, "Execution timeout after 5 seconds");
    }

    #[test]
    fn settings_follow_config() {
        let cfg = Config::resolve(crate::config::ConfigFile::default(), |k| match k {
            "EXECUTION_TIMEOUT" => Some("7".to_string()),
            "ENABLE_DOCKER" => Some("false".to_string()),
            _ => None,
        })
        .unwrap();

        let settings = ExecutorSettings::from_config(&cfg);
        assert_eq!(settings.timeout, Duration::from_secs(7));
        assert!(!settings.use_container);
        assert!(settings.sandboxing);
    }

    #[tokio::test]
    async fn disabled_containers_mean_local_mode_without_fallback() {
        let executor = Executor::new(ExecutorSettings {
            use_container: false,
            ..ExecutorSettings::default()
        })
        .await;

        assert_eq!(executor.mode(), IsolationMode::Local);
        assert!(executor.fallback_reason().is_none());
    }

    #[tokio::test]
    async fn unreachable_runtime_falls_back_to_local_and_says_so() {
        let executor = Executor::new(ExecutorSettings {
            use_container: true,
            runtime: Runtime {
                docker: "/nonexistent/gptbuilder-docker".to_string(),
                ..Runtime::default()
            },
            ..ExecutorSettings::default()
        })
        .await;

        assert_eq!(executor.mode(), IsolationMode::Local);
        assert!(executor.fallback_reason().is_some());
    }
}
