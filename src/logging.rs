// src/logging.rs

//! Tracing setup for the binary.
//!
//! `RUST_LOG` wins when set. Otherwise `--verbose` means debug, and
//! `LOG_LEVEL` (Python-style names accepted) decides. Dependencies are held
//! at `warn` so HTTP client chatter stays out of the way.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Map a configured level name onto a tracing level directive.
///
/// Unknown names fall back to `info`.
pub fn level_directive(name: &str) -> &'static str {
    match name.trim().to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARN" | "WARNING" => "warn",
        "ERROR" | "CRITICAL" | "FATAL" => "error",
        _ => "info",
    }
}

fn filter(level: &str, verbose: bool) -> EnvFilter {
    let level = if verbose { "debug" } else { level_directive(level) };
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,gptbuilder={level}")))
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered file output is flushed.
pub fn init(level: &str, log_file: Option<&Path>, verbose: bool) -> Option<WorkerGuard> {
    let (file_writer, guard, file_error) = match log_file.map(file_appender) {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(writer), Some(guard), None)
        }
        Some(Err(e)) => (None, None, Some(e)),
        None => (None, None, None),
    };

    let file_layer = file_writer.map(|w| fmt::layer().with_ansi(false).with_writer(w));

    tracing_subscriber::registry()
        .with(filter(level, verbose))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    if let Some(e) = file_error {
        tracing::warn!(error = %e, "file logging disabled");
    }

    guard
}

fn file_appender(path: &Path) -> Result<RollingFileAppender, String> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("log file path has no file name: {}", path.display()))?;

    crate::util::ensure_dir(dir).map_err(|e| format!("{e:#}"))?;

    RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(name)
        .build(dir)
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn python_level_names_are_understood() {
        assert_eq!(level_directive("WARNING"), "warn");
        assert_eq!(level_directive("critical"), "error");
        assert_eq!(level_directive("Debug"), "debug");
        assert_eq!(level_directive("INFO"), "info");
        assert_eq!(level_directive("LOUD"), "info");
    }

    #[test]
    fn appender_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("gptbuilder.log");

        assert!(file_appender(&path).is_ok());
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn appender_rejects_paths_without_a_file_name() {
        assert!(file_appender(Path::new("/")).is_err());
    }
}
