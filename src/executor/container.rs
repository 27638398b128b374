// src/executor/container.rs

//! Docker execution through the `docker` CLI.
//!
//! Each call gets its own temp directory, mounted read-only at
//! `/workspace`, and its own uniquely named `--rm` container.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::process::Command as TokioCommand;
use uuid::Uuid;

use super::{ExecutionResult, ExecutorSettings};
use crate::language::Language;

pub const WORKSPACE: &str = "/workspace";
pub const MEMORY_LIMIT: &str = "512m";

/// `docker run` exits with 125 when the daemon rejected the run itself
/// (bad image, bad flags), as opposed to the contained process failing.
const DOCKER_RUN_ERROR: i32 = 125;

const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Check that the daemon answers.
pub(super) async fn probe(docker: &str) -> Result<(), String> {
    let mut cmd = TokioCommand::new(docker);
    cmd.arg("info")
        .arg("--format")
        .arg("{{.ServerVersion}}")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd
        .spawn()
        .map_err(|e| format!("cannot launch {docker}: {e}"))?;

    match tokio::time::timeout(PROBE_TIMEOUT, child.wait_with_output()).await {
        Ok(Ok(out)) if out.status.success() => Ok(()),
        Ok(Ok(out)) => Err(format!(
            "{docker} info failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        )),
        Ok(Err(e)) => Err(format!("{docker} info failed: {e}")),
        Err(_) => Err(format!(
            "{docker} info did not answer within {}s",
            PROBE_TIMEOUT.as_secs()
        )),
    }
}

pub(super) async fn run(
    settings: &ExecutorSettings,
    code: &str,
    language: Language,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> ExecutionResult {
    let workdir = match write_workspace(settings, code, language) {
        Ok(dir) => dir,
        Err(e) => return ExecutionResult::internal_failure(format!("{e:#}")),
    };

    let name = format!("gptbuilder-{}", Uuid::new_v4().simple());
    let docker = &settings.runtime.docker;
    let run_args = run_args(
        &name,
        workdir.path(),
        language,
        args,
        env,
        settings.sandboxing,
    );

    let mut cmd = TokioCommand::new(docker);
    cmd.args(&run_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "failed to launch container");
            return ExecutionResult::internal_failure(format!("Failed to launch {docker}: {e}"));
        }
    };

    match tokio::time::timeout(settings.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => {
            let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

            match output.status.code() {
                Some(DOCKER_RUN_ERROR) => {
                    tracing::error!(container = %name, "container runtime rejected the run");
                    ExecutionResult::internal_failure(stderr)
                }
                code => {
                    if code != Some(0) {
                        tracing::error!(container = %name, ?code, "container exited non-zero");
                    }
                    ExecutionResult::completed(stdout, stderr, code)
                }
            }
        }
        Ok(Err(e)) => {
            ExecutionResult::internal_failure(format!("Failed while waiting for container: {e}"))
        }
        Err(_) => {
            // Killing the CLI client does not stop the container.
            kill_container(docker, &name).await;
            tracing::error!(
                container = %name,
                timeout_secs = settings.timeout.as_secs(),
                "container execution timed out"
            );
            ExecutionResult::timed_out(settings.timeout)
        }
    }
}

fn write_workspace(
    settings: &ExecutorSettings,
    code: &str,
    language: Language,
) -> Result<tempfile::TempDir> {
    let mut builder = tempfile::Builder::new();
    builder.prefix("gptbuilder_ws_");

    let dir = match &settings.scratch_dir {
        Some(parent) => builder.tempdir_in(parent),
        None => builder.tempdir(),
    }
    .context("Failed to create container workspace")?;

    let file = dir.path().join(source_file_name(language));
    std::fs::write(&file, code)
        .with_context(|| format!("Failed to write {:?}", file))?;

    Ok(dir)
}

fn source_file_name(language: Language) -> String {
    format!("code.{}", language.extension())
}

/// Arguments for `docker run`, excluding the binary itself.
pub(super) fn run_args(
    name: &str,
    host_dir: &Path,
    language: Language,
    args: &[String],
    env: &BTreeMap<String, String>,
    sandboxing: bool,
) -> Vec<String> {
    let mut out: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "--quiet".into(),
        "--name".into(),
        name.into(),
        "--memory".into(),
        MEMORY_LIMIT.into(),
    ];

    if sandboxing {
        out.push("--network".into());
        out.push("none".into());
    }

    out.push("-v".into());
    out.push(format!("{}:{}:ro", host_dir.display(), WORKSPACE));
    out.push("-w".into());
    out.push(WORKSPACE.into());

    for (key, value) in env {
        out.push("-e".into());
        out.push(format!("{key}={value}"));
    }

    out.push(language.image().into());
    out.extend(language.container_command(&source_file_name(language), args));
    out
}

async fn kill_container(docker: &str, name: &str) {
    let result = TokioCommand::new(docker)
        .arg("kill")
        .arg(name)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    if let Err(e) = result {
        tracing::warn!(container = %name, error = %e, "failed to kill timed-out container");
    }
}
