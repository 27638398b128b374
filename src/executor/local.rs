// src/executor/local.rs

//! Host-process execution.

use std::collections::BTreeMap;
use std::io::Write;
use std::process::Stdio;

use anyhow::{Context, Result};
use tempfile::NamedTempFile;
use tokio::process::Command as TokioCommand;

use super::{ExecutionResult, ExecutorSettings};
use crate::language::Language;

pub(super) async fn run(
    settings: &ExecutorSettings,
    code: &str,
    language: Language,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> ExecutionResult {
    // The temp file lives until the end of this function and is removed on
    // drop, whichever way we leave. Removal errors are ignored by tempfile.
    let source = match write_source(settings, code, language) {
        Ok(f) => f,
        Err(e) => return ExecutionResult::internal_failure(format!("{e:#}")),
    };

    let file = source.path().to_string_lossy().to_string();
    let argv = language.local_command(&settings.runtime, &file, args);

    let mut cmd = TokioCommand::new(&argv[0]);
    cmd.args(&argv[1..])
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(program = %argv[0], error = %e, "failed to spawn");
            return ExecutionResult::internal_failure(format!(
                "Failed to spawn {}: {}",
                argv[0], e
            ));
        }
    };

    // Dropping the wait future on timeout drops the child, and kill_on_drop
    // terminates it.
    match tokio::time::timeout(settings.timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => ExecutionResult::completed(
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
            output.status.code(),
        ),
        Ok(Err(e)) => ExecutionResult::internal_failure(format!(
            "Failed while waiting for process: {e}"
        )),
        Err(_) => {
            tracing::error!(
                timeout_secs = settings.timeout.as_secs(),
                "execution timed out"
            );
            ExecutionResult::timed_out(settings.timeout)
        }
    }
}

fn write_source(
    settings: &ExecutorSettings,
    code: &str,
    language: Language,
) -> Result<NamedTempFile> {
    let suffix = format!(".{}", language.extension());
    let mut builder = tempfile::Builder::new();
    builder.prefix("gptbuilder_").suffix(&suffix);

    let mut file = match &settings.scratch_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .context("Failed to create temp source file")?;

    file.write_all(code.as_bytes())
        .context("Failed to write temp source file")?;
    file.flush().context("Failed to flush temp source file")?;

    Ok(file)
}
