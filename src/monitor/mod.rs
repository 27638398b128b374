// src/monitor/mod.rs

//! Health checks over deployment directories.
//!
//! Checks never fail with an error. Problems show up in the `status` of the
//! returned `HealthRecord`, and every record is appended to the history
//! store under the deployment directory's base name.

mod history;

use chrono::{DateTime, Duration as ChronoDuration, Local};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command as TokioCommand;

pub use history::{HistoryStore, InMemoryHistory};

pub const SYNTAX_CHECK_TIMEOUT: Duration = Duration::from_secs(10);
pub const RECENT_LOG_LINES: usize = 10;
pub const REPORT_WINDOW_HOURS: i64 = 24;
pub const REPORT_RECENT_ISSUES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Warning => "warning",
            HealthStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthRecord {
    pub status: HealthStatus,
    pub deployment_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syntax_valid: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Local>,
}

impl HealthRecord {
    pub fn new(status: HealthStatus, deployment_path: PathBuf) -> Self {
        Self {
            status,
            deployment_path,
            main_file: None,
            file_size: None,
            syntax_valid: None,
            message: None,
            timestamp: Local::now(),
        }
    }

    fn error(deployment_path: &Path, message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::new(HealthStatus::Error, deployment_path.to_path_buf())
        }
    }
}

/// Outcome of scanning a log file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum LogAnalysis {
    Success {
        total_lines: usize,
        errors: usize,
        warnings: usize,
        recent_errors: Vec<String>,
        recent_warnings: Vec<String>,
        timestamp: DateTime<Local>,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    NotImplemented,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoFixOutcome {
    pub status: FixStatus,
    pub message: String,
    pub deployment_path: PathBuf,
    pub issue: String,
    pub timestamp: DateTime<Local>,
}

pub struct Monitor {
    python: String,
    history: Arc<dyn HistoryStore>,
}

impl Monitor {
    /// Monitor with a fresh in-memory history.
    pub fn new(python: impl Into<String>) -> Self {
        Self::with_store(python, Arc::new(InMemoryHistory::new()))
    }

    pub fn with_store(python: impl Into<String>, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            python: python.into(),
            history,
        }
    }

    pub async fn health_check(&self, deployment_path: &Path) -> HealthRecord {
        let record = self.inspect(deployment_path).await;

        match record.status {
            HealthStatus::Healthy => {
                tracing::info!(path = %deployment_path.display(), "deployment healthy")
            }
            HealthStatus::Warning => {
                tracing::warn!(path = %deployment_path.display(), "deployment has syntax errors")
            }
            HealthStatus::Error => tracing::error!(
                path = %deployment_path.display(),
                reason = record.message.as_deref().unwrap_or_default(),
                "health check failed"
            ),
        }

        self.history
            .append(&history_key(deployment_path), record.clone());
        record
    }

    async fn inspect(&self, deployment_path: &Path) -> HealthRecord {
        if !deployment_path.exists() {
            return HealthRecord::error(deployment_path, "Deployment not found");
        }

        let main_file = match find_main_file(deployment_path) {
            Ok(Some(f)) => f,
            Ok(None) => return HealthRecord::error(deployment_path, "Main file not found"),
            Err(e) => return HealthRecord::error(deployment_path, format!("{e:#}")),
        };

        let file_size = match std::fs::metadata(&main_file) {
            Ok(m) => m.len(),
            Err(e) => return HealthRecord::error(deployment_path, e.to_string()),
        };

        let syntax_valid = if main_file.extension().is_some_and(|ext| ext == "py") {
            self.python_syntax_ok(&main_file).await
        } else {
            true
        };

        HealthRecord {
            main_file: Some(main_file),
            file_size: Some(file_size),
            syntax_valid: Some(syntax_valid),
            ..HealthRecord::new(
                if syntax_valid {
                    HealthStatus::Healthy
                } else {
                    HealthStatus::Warning
                },
                deployment_path.to_path_buf(),
            )
        }
    }

    /// `python3 -m py_compile`, with bytecode redirected to a throwaway
    /// directory so the deployment stays untouched.
    async fn python_syntax_ok(&self, file: &Path) -> bool {
        let cache = match tempfile::Builder::new().prefix("gptbuilder_pyc_").tempdir() {
            Ok(d) => d,
            Err(e) => {
                tracing::error!(error = %e, "syntax check failed");
                return false;
            }
        };

        let mut cmd = TokioCommand::new(&self.python);
        cmd.arg("-m")
            .arg("py_compile")
            .arg(file)
            .env("PYTHONPYCACHEPREFIX", cache.path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = match cmd.spawn() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(python = %self.python, error = %e, "syntax check failed");
                return false;
            }
        };

        match tokio::time::timeout(SYNTAX_CHECK_TIMEOUT, child.wait_with_output()).await {
            Ok(Ok(out)) => {
                if !out.status.success() {
                    tracing::debug!(
                        stderr = %String::from_utf8_lossy(&out.stderr).trim(),
                        "py_compile rejected file"
                    );
                }
                out.status.success()
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "syntax check failed");
                false
            }
            Err(_) => {
                tracing::error!("syntax check timed out");
                false
            }
        }
    }

    /// Count lines mentioning ERROR and WARNING (case-insensitive).
    ///
    /// A line can count as both.
    pub fn analyze_logs(&self, log_file: &Path) -> LogAnalysis {
        if !log_file.exists() {
            return LogAnalysis::Error {
                message: "Log file not found".to_string(),
            };
        }

        let content = match std::fs::read(log_file) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                tracing::error!(error = %e, "log analysis failed");
                return LogAnalysis::Error {
                    message: e.to_string(),
                };
            }
        };

        let (error_re, warning_re) = match (mentions("error"), mentions("warning")) {
            (Ok(e), Ok(w)) => (e, w),
            (Err(e), _) | (_, Err(e)) => {
                return LogAnalysis::Error {
                    message: e.to_string(),
                }
            }
        };

        let lines: Vec<&str> = content.split('\n').collect();
        let errors: Vec<&str> = lines.iter().copied().filter(|l| error_re.is_match(l)).collect();
        let warnings: Vec<&str> = lines
            .iter()
            .copied()
            .filter(|l| warning_re.is_match(l))
            .collect();

        LogAnalysis::Success {
            total_lines: lines.len(),
            errors: errors.len(),
            warnings: warnings.len(),
            recent_errors: tail(&errors, RECENT_LOG_LINES),
            recent_warnings: tail(&warnings, RECENT_LOG_LINES),
            timestamp: Local::now(),
        }
    }

    /// Records for `deployment_name` from the last `hours` hours.
    pub fn health_history(&self, deployment_name: &str, hours: i64) -> Vec<HealthRecord> {
        let cutoff = Local::now() - ChronoDuration::hours(hours);
        self.history
            .records(deployment_name)
            .into_iter()
            .filter(|r| r.timestamp >= cutoff)
            .collect()
    }

    /// Markdown summary of the last 24 hours.
    pub fn generate_report(&self, deployment_name: &str) -> String {
        let history = self.health_history(deployment_name, REPORT_WINDOW_HOURS);
        if history.is_empty() {
            return format!("No health history available for {deployment_name}");
        }

        let total = history.len();
        let count = |s: HealthStatus| history.iter().filter(|h| h.status == s).count();
        let pct = |n: usize| n as f64 / total as f64 * 100.0;
        let (healthy, warnings, errors) = (
            count(HealthStatus::Healthy),
            count(HealthStatus::Warning),
            count(HealthStatus::Error),
        );

        let mut report = format!(
            "# Maintenance Report: {deployment_name}\n\n\
             ## Summary\n\
             - Total checks: {total}\n\
             - Period: Last {REPORT_WINDOW_HOURS} hours\n\
             - Generated: {}\n\n\
             ## Health Status\n\n\
             - Healthy: {healthy} ({:.1}%)\n\
             - Warnings: {warnings} ({:.1}%)\n\
             - Errors: {errors} ({:.1}%)\n\n\
             ## Recent Issues\n",
            Local::now().to_rfc3339(),
            pct(healthy),
            pct(warnings),
            pct(errors),
        );

        let issues: Vec<&HealthRecord> = history
            .iter()
            .filter(|h| h.status != HealthStatus::Healthy)
            .collect();
        let recent = &issues[issues.len().saturating_sub(REPORT_RECENT_ISSUES)..];

        if recent.is_empty() {
            report.push_str("\nNo recent issues detected.");
        }
        for issue in recent {
            report.push_str(&format!(
                "\n- [{}] {}: {}",
                issue.timestamp.to_rfc3339(),
                issue.status,
                issue.message.as_deref().unwrap_or("No details"),
            ));
        }

        report
    }

    /// Placeholder. Always reports `not_implemented` and changes nothing.
    pub fn auto_fix(&self, deployment_path: &Path, issue: &str) -> AutoFixOutcome {
        tracing::info!(path = %deployment_path.display(), issue, "auto-fix attempted");
        AutoFixOutcome {
            status: FixStatus::NotImplemented,
            message: "Auto-fix functionality requires GPT integration".to_string(),
            deployment_path: deployment_path.to_path_buf(),
            issue: issue.to_string(),
            timestamp: Local::now(),
        }
    }
}

/// History key: the final path component, so equal base names share history.
pub fn history_key(deployment_path: &Path) -> String {
    deployment_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| deployment_path.display().to_string())
}

/// First `main.*` regular file, by name.
fn find_main_file(dir: &Path) -> anyhow::Result<Option<PathBuf>> {
    let pattern = format!("{}/main.*", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut matches: Vec<PathBuf> = glob::glob(&pattern)?
        .filter_map(Result::ok)
        .filter(|p| p.is_file())
        .collect();
    matches.sort();
    Ok(matches.into_iter().next())
}

/// Case-insensitive substring matcher, so `Errors:` and `WARNINGS` count.
fn mentions(needle: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(&regex::escape(needle))
        .case_insensitive(true)
        .build()
}

fn tail(lines: &[&str], n: usize) -> Vec<String> {
    lines[lines.len().saturating_sub(n)..]
        .iter()
        .map(|l| l.to_string())
        .collect()
}
