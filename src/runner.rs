// src/runner.rs

use crate::cli::{Cli, Command, OutputFormat};
use crate::config::Config;
use crate::deployer::{DeployProvider, Deployer, DeploymentRecord};
use crate::engine::{run_pipeline, validate_config, Components, PipelineRequest, PipelineStatus};
use crate::executor::{ExecutionResult, Executor, ExecutorSettings, IsolationMode};
use crate::generator::Generator;
use crate::language::Language;
use crate::monitor::{history_key, HealthRecord, HealthStatus, LogAnalysis, Monitor};
use crate::util::{read_to_string, truncate, write_file};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

/// How far stdout/stderr are cut in simple output of the `auto` command.
const PREVIEW_CHARS: usize = 200;

/// Entry point from `main.rs`.
pub async fn run(cli: Cli, cfg: Config) -> Result<()> {
    let out = Output {
        format: cli.format,
        use_color: should_use_color(),
    };

    match cli.command {
        Command::Generate {
            requirement,
            language,
            context,
            output,
        } => generate(&cfg, &out, &requirement, &language, context.as_deref(), output).await,

        Command::Refine {
            code_file,
            feedback,
            language,
            output,
        } => refine(&cfg, &out, &code_file, &feedback, &language, output).await,

        Command::GenerateTests {
            code_file,
            language,
            output,
        } => generate_tests(&cfg, &out, &code_file, &language, output).await,

        Command::Execute {
            code_file,
            language,
            no_docker,
            env,
            args,
        } => {
            let env: BTreeMap<String, String> = env.into_iter().collect();
            execute(&cfg, &out, &code_file, &language, no_docker, &args, &env).await
        }

        Command::Deploy {
            code_file,
            name,
            language,
            provider,
            repo,
            branch,
        } => deploy(
            &cfg,
            &out,
            &code_file,
            &name,
            &language,
            provider.as_deref(),
            repo,
            &branch,
        ),

        Command::ListDeployments => list_deployments(&cfg, &out),

        Command::DeleteDeployment { name } => delete_deployment(&cfg, &out, &name),

        Command::Monitor {
            deployment_path,
            report,
        } => monitor(&cfg, &out, &deployment_path, report).await,

        Command::AnalyzeLogs { log_file } => analyze_logs(&cfg, &out, &log_file),

        Command::Auto {
            requirement,
            language,
            name,
            no_execute,
            context,
        } => {
            let request = PipelineRequest {
                requirement,
                language: Language::resolve(&language),
                name,
                context,
                execute: !no_execute,
            };
            auto(&cfg, &out, request).await
        }

        Command::CheckConfig => check_config(&cfg, &out),
    }
}

/* ---------------- output ---------------- */

struct Output {
    format: OutputFormat,
    use_color: bool,
}

impl Output {
    /// Print `value` as JSON, or the `simple` rendering in simple mode.
    fn emit<T: Serialize>(&self, value: &T, simple: impl FnOnce(bool) -> String) -> Result<()> {
        let text = match self.format {
            OutputFormat::Json => {
                serde_json::to_string(value).context("Failed to format output as JSON")?
            }
            OutputFormat::Pretty => serde_json::to_string_pretty(value)
                .context("Failed to format output as pretty JSON")?,
            OutputFormat::Simple => simple(self.use_color),
        };
        println!("{}", text.trim_end());
        Ok(())
    }
}

fn should_use_color() -> bool {
    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }
    std::io::stdout().is_terminal()
}

fn paint(text: &str, color: &str, use_color: bool) -> String {
    if use_color {
        format!("\x1b[{}m{}\x1b[0m", color, text)
    } else {
        text.to_string()
    }
}

fn status_word(ok: bool, use_color: bool) -> String {
    if ok {
        paint("OK", "32", use_color)
    } else {
        paint("FAIL", "31", use_color)
    }
}

fn health_color(status: HealthStatus) -> &'static str {
    match status {
        HealthStatus::Healthy => "32",
        HealthStatus::Warning => "33",
        HealthStatus::Error => "31",
    }
}

/* ---------------- generation ---------------- */

async fn generate(
    cfg: &Config,
    out: &Output,
    requirement: &str,
    language: &str,
    context: Option<&str>,
    output: Option<PathBuf>,
) -> Result<()> {
    let generator = Generator::from_config(cfg)?;
    let language = Language::resolve(language);

    tracing::info!(%language, "generating code");
    let result = generator.generate(requirement, language, context).await?;

    if let Some(path) = &output {
        write_file(path, &result.code)?;
    }

    out.emit(&result, |_| {
        let mut s = String::new();
        match &output {
            Some(path) => s.push_str(&format!("Code saved to {}\n", path.display())),
            None => {
                s.push_str("--- Generated Code ---\n");
                s.push_str(&result.code);
                s.push('\n');
            }
        }
        s.push_str(&format!("--- Tokens used: {} ({}) ---", result.tokens_used, result.model));
        s
    })
}

async fn refine(
    cfg: &Config,
    out: &Output,
    code_file: &Path,
    feedback: &str,
    language: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let generator = Generator::from_config(cfg)?;
    let language = Language::resolve(language);
    let code = read_to_string(code_file)?;

    let refined = generator.refine(&code, feedback, language).await?;
    emit_code(out, "Refined Code", &refined, language, output.as_deref())
}

async fn generate_tests(
    cfg: &Config,
    out: &Output,
    code_file: &Path,
    language: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let generator = Generator::from_config(cfg)?;
    let language = Language::resolve(language);
    let code = read_to_string(code_file)?;

    let tests = generator.generate_tests(&code, language).await?;
    emit_code(out, "Generated Tests", &tests, language, output.as_deref())
}

fn emit_code(
    out: &Output,
    title: &str,
    code: &str,
    language: Language,
    output: Option<&Path>,
) -> Result<()> {
    if let Some(path) = output {
        write_file(path, code)?;
    }

    let payload = json!({
        "code": code,
        "language": language,
        "output": output,
    });
    out.emit(&payload, |_| match output {
        Some(path) => format!("{title} saved to {}", path.display()),
        None => format!("--- {title} ---\n{code}"),
    })
}

/* ---------------- execution ---------------- */

#[derive(Serialize)]
struct ExecutionReport<'a> {
    mode: IsolationMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    fallback_reason: Option<&'a str>,
    #[serde(flatten)]
    result: &'a ExecutionResult,
}

async fn execute(
    cfg: &Config,
    out: &Output,
    code_file: &Path,
    language: &str,
    no_docker: bool,
    args: &[String],
    env: &BTreeMap<String, String>,
) -> Result<()> {
    let language = Language::resolve(language);
    let code = read_to_string(code_file)?;

    let mut settings = ExecutorSettings::from_config(cfg);
    if no_docker {
        settings.use_container = false;
    }
    let executor = Executor::new(settings).await;

    let result = executor.execute(&code, language, args, env).await;

    let report = ExecutionReport {
        mode: executor.mode(),
        fallback_reason: executor.fallback_reason(),
        result: &result,
    };
    out.emit(&report, |color| {
        let mut s = format!(
            "{} {} ({:?})\n",
            status_word(result.success, color),
            code_file.display(),
            report.mode
        );
        if let Some(reason) = report.fallback_reason {
            s.push_str(&format!("container fallback: {reason}\n"));
        }
        if !result.stdout.is_empty() {
            s.push_str("--- stdout ---\n");
            s.push_str(result.stdout.trim_end());
            s.push('\n');
        }
        if !result.stderr.is_empty() {
            s.push_str("--- stderr ---\n");
            s.push_str(result.stderr.trim_end());
            s.push('\n');
        }
        s.push_str(&format!("return code: {}", result.return_code));
        s
    })?;

    if !result.success {
        bail!("Execution failed with return code {}", result.return_code);
    }
    Ok(())
}

/* ---------------- deployment ---------------- */

#[allow(clippy::too_many_arguments)]
fn deploy(
    cfg: &Config,
    out: &Output,
    code_file: &Path,
    name: &str,
    language: &str,
    provider: Option<&str>,
    repo: Option<PathBuf>,
    branch: &str,
) -> Result<()> {
    let provider: DeployProvider = provider
        .unwrap_or(&cfg.deploy_provider)
        .parse()
        .map_err(anyhow::Error::msg)?;
    let language = Language::resolve(language);
    let code = read_to_string(code_file)?;
    let deployer = Deployer::new(&cfg.deploy_path)?;

    match provider {
        DeployProvider::Local => match deployer.deploy(&code, name, language, None) {
            Ok(d) => out.emit(&d, |color| {
                format!(
                    "{} deployed {}\nlocation: {}",
                    status_word(true, color),
                    d.deployment_name,
                    d.deployment_path.display()
                )
            }),
            Err(failure) => {
                out.emit(&failure, |color| {
                    format!("{} {}", status_word(false, color), failure)
                })?;
                bail!("Deployment failed");
            }
        },
        DeployProvider::Git => {
            let repo = repo.context("--repo is required for the git provider")?;
            match deployer.deploy_to_git(&code, name, &repo, branch, language) {
                Ok(d) => out.emit(&d, |color| {
                    format!(
                        "{} committed {} ({})\nbranch: {}{}",
                        status_word(true, color),
                        d.file_path.display(),
                        d.commit,
                        d.branch,
                        match &d.remote {
                            Some(remote) => format!(" (pushed to {remote})"),
                            None => " (no remote, not pushed)".to_string(),
                        }
                    )
                }),
                Err(failure) => {
                    out.emit(&failure, |color| {
                        format!("{} {}", status_word(false, color), failure)
                    })?;
                    bail!("Git deployment failed");
                }
            }
        }
    }
}

fn list_deployments(cfg: &Config, out: &Output) -> Result<()> {
    let deployer = Deployer::new(&cfg.deploy_path)?;
    let records = deployer.list_deployments();

    out.emit(&records, |_| format_deployments(&records))
}

fn format_deployments(records: &[DeploymentRecord]) -> String {
    if records.is_empty() {
        return "No deployments found.".to_string();
    }

    let mut s = format!("Found {} deployment(s):\n", records.len());
    for r in records {
        s.push_str(&format!(
            "\n  - {}\n    Path: {}\n    Created: {}\n",
            r.name,
            r.path.display(),
            r.created_at.to_rfc3339()
        ));
    }
    s
}

fn delete_deployment(cfg: &Config, out: &Output, name: &str) -> Result<()> {
    let deployer = Deployer::new(&cfg.deploy_path)?;
    let deleted = deployer.delete_deployment(name);

    out.emit(&json!({ "deployment_name": name, "deleted": deleted }), |color| {
        if deleted {
            format!("{} deleted {name}", status_word(true, color))
        } else {
            format!("{} deployment not found: {name}", status_word(false, color))
        }
    })?;

    if !deleted {
        bail!("Deployment not found: {name}");
    }
    Ok(())
}

/* ---------------- monitoring ---------------- */

async fn monitor(cfg: &Config, out: &Output, path: &Path, with_report: bool) -> Result<()> {
    let monitor = Monitor::new(cfg.runtime.python.clone());
    let record = monitor.health_check(path).await;
    let report = with_report.then(|| monitor.generate_report(&history_key(path)));

    out.emit(&json!({ "health": &record, "report": &report }), |color| {
        let mut s = format_health(&record, color);
        if let Some(report) = &report {
            s.push_str("\n\n");
            s.push_str(report);
        }
        s
    })?;

    if record.status == HealthStatus::Error {
        bail!("Health check failed");
    }
    Ok(())
}

fn format_health(record: &HealthRecord, color: bool) -> String {
    let mut s = format!(
        "Status: {}\n",
        paint(&record.status.to_string(), health_color(record.status), color)
    );
    if let Some(main) = &record.main_file {
        s.push_str(&format!("Main file: {}\n", main.display()));
    }
    if let Some(size) = record.file_size {
        s.push_str(&format!("File size: {size} bytes\n"));
    }
    if let Some(valid) = record.syntax_valid {
        s.push_str(&format!("Syntax valid: {valid}\n"));
    }
    if let Some(message) = &record.message {
        s.push_str(&format!("Message: {message}\n"));
    }
    s.push_str(&format!("Timestamp: {}", record.timestamp.to_rfc3339()));
    s
}

fn analyze_logs(cfg: &Config, out: &Output, log_file: &Path) -> Result<()> {
    let monitor = Monitor::new(cfg.runtime.python.clone());
    let analysis = monitor.analyze_logs(log_file);

    out.emit(&analysis, |color| match &analysis {
        LogAnalysis::Success {
            total_lines,
            errors,
            warnings,
            recent_errors,
            recent_warnings,
            ..
        } => {
            let mut s = format!(
                "Total lines: {total_lines}\nErrors: {}\nWarnings: {}\n",
                paint(&errors.to_string(), if *errors > 0 { "31" } else { "32" }, color),
                paint(&warnings.to_string(), if *warnings > 0 { "33" } else { "32" }, color),
            );
            for (title, lines) in [("Recent errors", recent_errors), ("Recent warnings", recent_warnings)] {
                if !lines.is_empty() {
                    s.push_str(&format!("{title}:\n"));
                    for line in lines {
                        s.push_str(&format!("- {line}\n"));
                    }
                }
            }
            s
        }
        LogAnalysis::Error { message } => format!("{} {message}", status_word(false, color)),
    })?;

    if let LogAnalysis::Error { message } = analysis {
        bail!("Log analysis failed: {message}");
    }
    Ok(())
}

/* ---------------- autonomous pipeline ---------------- */

async fn auto(cfg: &Config, out: &Output, request: PipelineRequest) -> Result<()> {
    let generator = Generator::from_config(cfg)?;
    let executor = Executor::new(ExecutorSettings::from_config(cfg)).await;
    let deployer = Deployer::new(&cfg.deploy_path)?;
    let monitor = Monitor::new(cfg.runtime.python.clone());

    let parts = Components {
        generator: &generator,
        executor: &executor,
        deployer: &deployer,
        monitor: &monitor,
    };

    let (summary, sink) = run_pipeline(&parts, &request).await?;
    let ok = summary.ok();

    let simple = |color: bool| {
        let mut s = String::from("=== Step 1: Code Generation ===\n");
        s.push_str(&format!(
            "{} generated {} tokens with {}\n",
            status_word(true, color),
            summary.generation.tokens_used,
            summary.generation.model
        ));

        if !summary.executions.is_empty() {
            s.push_str("\n=== Step 2: Code Execution ===\n");
            for (i, r) in summary.executions.iter().enumerate() {
                if r.success {
                    s.push_str(&format!("{} attempt {}\n", status_word(true, color), i + 1));
                    if !r.stdout.is_empty() {
                        s.push_str(&format!("output: {}\n", truncate(r.stdout.trim_end(), PREVIEW_CHARS)));
                    }
                } else {
                    s.push_str(&format!(
                        "{} attempt {}: {}\n",
                        status_word(false, color),
                        i + 1,
                        truncate(r.stderr.trim_end(), PREVIEW_CHARS)
                    ));
                }
            }
            if summary.refined {
                s.push_str("code was refined once after the first failure\n");
            }
        }

        s.push_str("\n=== Step 3: Deployment ===\n");
        match (&summary.deployment, &summary.deployment_error) {
            (Some(d), _) => s.push_str(&format!(
                "{} deployed to {}\n",
                status_word(true, color),
                d.deployment_path.display()
            )),
            (None, Some(f)) => s.push_str(&format!("{} {}\n", status_word(false, color), f)),
            (None, None) => {}
        }

        if let Some(health) = &summary.health {
            s.push_str("\n=== Step 4: Health Check ===\n");
            s.push_str(&format_health(health, color));
            s.push('\n');
        }

        s.push_str(&format!("\nrun: {}", summary.run_id));
        s
    };

    out.emit(
        &json!({ "summary": &summary, "events": sink.into_events() }),
        simple,
    )?;

    if summary.status == PipelineStatus::DeployFailed {
        bail!("Autonomous run failed: deployment failed");
    }
    if !ok {
        bail!("Autonomous run failed: deployment is unhealthy");
    }
    Ok(())
}

/* ---------------- configuration ---------------- */

fn check_config(cfg: &Config, out: &Output) -> Result<()> {
    let validation = validate_config(cfg);

    out.emit(&json!({ "config": cfg, "validation": &validation }), |color| {
        let mut s = format!(
            "{} configuration\n",
            status_word(validation.is_valid(), color)
        );
        s.push_str(&format!("model: {}\n", cfg.openai_model));
        s.push_str(&format!(
            "docker: {} (sandboxing: {})\n",
            cfg.enable_docker, cfg.enable_sandboxing
        ));
        s.push_str(&format!("timeout: {}s\n", cfg.execution_timeout));
        s.push_str(&format!("deploy: {} ({})\n", cfg.deploy_path.display(), cfg.deploy_provider));
        for e in &validation.errors {
            s.push_str(&format!("- {}: {}\n", e.code, e.message));
        }
        s
    })?;

    if !validation.is_valid() {
        bail!("Configuration is invalid");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use serde_json::Map;

    #[test]
    fn paint_only_colours_when_asked() {
        assert_eq!(paint("OK", "32", false), "OK");
        assert_eq!(paint("OK", "32", true), "\x1b[32mOK\x1b[0m");
    }

    #[test]
    fn empty_deployment_list() {
        assert_eq!(format_deployments(&[]), "No deployments found.");
    }

    #[test]
    fn deployment_list_shows_name_and_path() {
        let records = vec![DeploymentRecord {
            name: "app_20240101_000000".to_string(),
            path: PathBuf::from("/d/app_20240101_000000"),
            created_at: Local::now(),
            metadata: Map::new(),
        }];

        let text = format_deployments(&records);
        assert!(text.starts_with("Found 1 deployment(s):"));
        assert!(text.contains("  - app_20240101_000000"));
        assert!(text.contains("Path: /d/app_20240101_000000"));
    }

    #[test]
    fn health_rendering_skips_missing_fields() {
        let mut record = HealthRecord::new(HealthStatus::Error, PathBuf::from("/d/x"));
        record.message = Some("Deployment not found".to_string());

        let text = format_health(&record, false);
        assert!(text.starts_with("Status: error"));
        assert!(text.contains("Message: Deployment not found"));
        assert!(!text.contains("Main file"));
    }
}
