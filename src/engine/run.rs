use serde_json::Value;
use std::collections::BTreeMap;

use crate::{
    deployer::{Deployer, Metadata},
    engine::{
        events::{run_created, PipelineEvent, PipelineEventKind},
        sink::EventSink,
        summary::{PipelineStatus, PipelineSummary},
    },
    errors::GeneratorError,
    executor::{ExecutionResult, Executor},
    generator::Generator,
    language::Language,
    monitor::Monitor,
    run_id::RunId,
    sinks::collecting::CollectingEventSink,
};

/// The four stages a pipeline run drives.
pub struct Components<'a> {
    pub generator: &'a Generator,
    pub executor: &'a Executor,
    pub deployer: &'a Deployer,
    pub monitor: &'a Monitor,
}

#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub requirement: String,
    pub language: Language,
    /// Base deployment name; a timestamp is appended.
    pub name: String,
    pub context: Option<String>,
    /// Run the generated code before deploying it.
    pub execute: bool,
}

/// Generate, optionally execute (refining once on failure), deploy and
/// health-check, collecting every stage transition as an event.
///
/// Only generator errors are returned as `Err`. A failed deployment ends
/// the run with `PipelineStatus::DeployFailed`.
///
/// The sink is owned here rather than passed in as `&mut dyn EventSink` so
/// the returned future stays `Send`.
pub async fn run_pipeline(
    parts: &Components<'_>,
    request: &PipelineRequest,
) -> Result<(PipelineSummary, CollectingEventSink), GeneratorError> {
    let mut sink = CollectingEventSink::new();
    let run_id = RunId::new();
    let emit = |sink: &mut CollectingEventSink, kind| sink.emit(PipelineEvent::new(&run_id, kind));

    sink.emit(run_created(&run_id));
    tracing::info!(run_id = %run_id, name = %request.name, "pipeline started");

    // ---- generation ----
    emit(&mut sink, PipelineEventKind::GenerationStarted);
    let generation = parts
        .generator
        .generate(&request.requirement, request.language, request.context.as_deref())
        .await?;
    emit(
        &mut sink,
        PipelineEventKind::GenerationFinished {
            tokens_used: generation.tokens_used,
        },
    );

    let mut code = generation.code.clone();
    let mut executions = Vec::new();
    let mut refined = false;

    // ---- execution, with one refine-and-retry ----
    if request.execute {
        if let Some(reason) = parts.executor.fallback_reason() {
            emit(
                &mut sink,
                PipelineEventKind::IsolationFallback {
                    reason: reason.to_string(),
                },
            );
        }

        let first = execute_attempt(parts.executor, &mut sink, &run_id, 1, &code, request.language).await;
        let failed = !first.success;
        let feedback = format!("The code failed with error: {}", first.stderr);
        executions.push(first);

        if failed {
            tracing::warn!(run_id = %run_id, "execution failed; refining once");
            emit(&mut sink, PipelineEventKind::RefinementStarted);
            code = parts
                .generator
                .refine(&code, &feedback, request.language)
                .await?;
            refined = true;
            emit(&mut sink, PipelineEventKind::RefinementFinished);

            let second =
                execute_attempt(parts.executor, &mut sink, &run_id, 2, &code, request.language).await;
            if !second.success {
                tracing::warn!(run_id = %run_id, "refined code still fails; deploying anyway");
            }
            executions.push(second);
        }
    }

    let execution_tested = executions.last().is_some_and(|r: &ExecutionResult| r.success);

    // ---- deployment ----
    let mut metadata = Metadata::new();
    metadata.insert("requirement".into(), Value::from(request.requirement.clone()));
    metadata.insert("tokens_used".into(), Value::from(generation.tokens_used));
    metadata.insert("execution_tested".into(), Value::Bool(execution_tested));
    metadata.insert("auto_generated".into(), Value::Bool(true));

    let deployment = match parts
        .deployer
        .deploy(&code, &request.name, request.language, Some(&metadata))
    {
        Ok(d) => d,
        Err(failure) => {
            emit(
                &mut sink,
                PipelineEventKind::DeploymentFailed {
                    deployment_name: failure.deployment_name.clone(),
                    error: failure.error.clone(),
                },
            );
            let summary = PipelineSummary {
                run_id,
                status: PipelineStatus::DeployFailed,
                generation,
                final_code: code,
                refined,
                executions,
                deployment: None,
                deployment_error: Some(failure),
                health: None,
            };
            return Ok((summary, sink));
        }
    };
    emit(
        &mut sink,
        PipelineEventKind::DeploymentFinished {
            deployment_name: deployment.deployment_name.clone(),
        },
    );

    // ---- health check ----
    let health = parts.monitor.health_check(&deployment.deployment_path).await;
    emit(
        &mut sink,
        PipelineEventKind::HealthChecked {
            status: health.status,
        },
    );

    tracing::info!(
        run_id = %run_id,
        deployment = %deployment.deployment_name,
        health = %health.status,
        "pipeline finished"
    );

    Ok((
        PipelineSummary {
            run_id,
            status: PipelineStatus::Deployed,
            generation,
            final_code: code,
            refined,
            executions,
            deployment: Some(deployment),
            deployment_error: None,
            health: Some(health),
        },
        sink,
    ))
}

async fn execute_attempt(
    executor: &Executor,
    sink: &mut CollectingEventSink,
    run_id: &RunId,
    attempt: u32,
    code: &str,
    language: Language,
) -> ExecutionResult {
    sink.emit(PipelineEvent::new(
        run_id,
        PipelineEventKind::ExecutionStarted { attempt },
    ));

    let result = executor.execute(code, language, &[], &BTreeMap::new()).await;

    sink.emit(PipelineEvent::new(
        run_id,
        PipelineEventKind::ExecutionFinished {
            attempt,
            success: result.success,
            return_code: result.return_code,
        },
    ));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Runtime;
    use crate::executor::ExecutorSettings;
    use crate::generator::testing::ScriptedBackend;
    use crate::monitor::HealthStatus;
    use std::sync::Arc;

    struct Fixture {
        _dir: tempfile::TempDir,
        deployer: Deployer,
        monitor: Monitor,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let deployer = Deployer::new(dir.path().join("deployments")).unwrap();
        Fixture {
            _dir: dir,
            deployer,
            monitor: Monitor::new("/nonexistent/gptbuilder-python"),
        }
    }

    fn local_executor(runtime: Runtime) -> Executor {
        Executor::local(ExecutorSettings {
            use_container: false,
            runtime,
            ..ExecutorSettings::default()
        })
    }

    fn request(language: Language, execute: bool) -> PipelineRequest {
        PipelineRequest {
            requirement: "say hello".to_string(),
            language,
            name: "hello".to_string(),
            context: None,
            execute,
        }
    }

    fn read_metadata(summary: &PipelineSummary) -> serde_json::Value {
        let path = summary
            .deployment
            .as_ref()
            .unwrap()
            .deployment_path
            .join("metadata.json");
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn without_execution_goes_straight_to_deploy() {
        let fx = fixture();
        let backend = Arc::new(ScriptedBackend::replying(&["console.log('hi')"]));
        let generator = Generator::new(backend.clone());
        let executor = local_executor(Runtime::default());
        let parts = Components {
            generator: &generator,
            executor: &executor,
            deployer: &fx.deployer,
            monitor: &fx.monitor,
        };

        let (summary, sink) = run_pipeline(&parts, &request(Language::JavaScript, false))
            .await
            .unwrap();

        assert_eq!(summary.status, PipelineStatus::Deployed);
        assert!(summary.executions.is_empty());
        assert!(!summary.refined);
        assert!(summary.ok());
        assert_eq!(summary.health.as_ref().unwrap().status, HealthStatus::Healthy);

        let deployment = summary.deployment.as_ref().unwrap();
        assert!(deployment.deployment_name.starts_with("hello_"));
        assert_eq!(
            std::fs::read_to_string(&deployment.code_file).unwrap(),
            "console.log('hi')"
        );

        let meta = read_metadata(&summary);
        assert_eq!(meta["requirement"], "say hello");
        assert_eq!(meta["tokens_used"], 100);
        assert_eq!(meta["execution_tested"], false);
        assert_eq!(meta["auto_generated"], true);

        assert_eq!(
            sink.kinds(),
            [
                &PipelineEventKind::RunCreated,
                &PipelineEventKind::GenerationStarted,
                &PipelineEventKind::GenerationFinished { tokens_used: 100 },
                &PipelineEventKind::DeploymentFinished {
                    deployment_name: deployment.deployment_name.clone()
                },
                &PipelineEventKind::HealthChecked {
                    status: HealthStatus::Healthy
                },
            ]
        );
        assert!(sink.events().iter().all(|e| e.run_id == summary.run_id));
        assert_eq!(backend.recorded().len(), 1);
    }

    #[tokio::test]
    async fn successful_execution_is_not_refined() {
        let fx = fixture();
        let generator = Generator::new(Arc::new(ScriptedBackend::replying(&["plain text"])));
        let executor = local_executor(Runtime::default());
        let parts = Components {
            generator: &generator,
            executor: &executor,
            deployer: &fx.deployer,
            monitor: &fx.monitor,
        };

        let (summary, _sink) = run_pipeline(&parts, &request(Language::PlainText, true))
            .await
            .unwrap();

        assert_eq!(summary.executions.len(), 1);
        assert!(summary.executions[0].success);
        assert!(!summary.refined);
        assert!(summary.execution_tested());
        assert_eq!(read_metadata(&summary)["execution_tested"], true);
    }

    #[tokio::test]
    async fn failed_execution_is_refined_once_with_stderr_feedback() {
        let fx = fixture();
        let backend = Arc::new(ScriptedBackend::replying(&["first()", "second()"]));
        let generator = Generator::new(backend.clone());
        let executor = local_executor(Runtime {
            node: "/nonexistent/gptbuilder-node".to_string(),
            ..Runtime::default()
        });
        let parts = Components {
            generator: &generator,
            executor: &executor,
            deployer: &fx.deployer,
            monitor: &fx.monitor,
        };

        let (summary, sink) = run_pipeline(&parts, &request(Language::JavaScript, true))
            .await
            .unwrap();

        assert!(summary.refined);
        assert_eq!(summary.executions.len(), 2);
        assert!(!summary.execution_tested());
        assert_eq!(summary.final_code, "second()");
        assert_eq!(summary.generation.code, "first()");
        assert_eq!(summary.status, PipelineStatus::Deployed);
        assert_eq!(
            std::fs::read_to_string(&summary.deployment.as_ref().unwrap().code_file).unwrap(),
            "second()"
        );

        let requests = backend.recorded();
        assert_eq!(requests.len(), 2);
        assert!(requests[1]
            .user
            .contains("The code failed with error: Failed to spawn"));

        let kinds = sink.kinds();
        assert!(kinds.contains(&&PipelineEventKind::RefinementStarted));
        assert!(kinds.contains(&&PipelineEventKind::ExecutionStarted { attempt: 2 }));
    }

    #[tokio::test]
    async fn deploy_failure_ends_the_run_without_health_check() {
        let fx = fixture();
        let root = fx.deployer.root().to_path_buf();
        std::fs::remove_dir_all(&root).unwrap();
        std::fs::write(&root, "not a directory").unwrap();

        let generator = Generator::new(Arc::new(ScriptedBackend::replying(&["x"])));
        let executor = local_executor(Runtime::default());
        let parts = Components {
            generator: &generator,
            executor: &executor,
            deployer: &fx.deployer,
            monitor: &fx.monitor,
        };

        let (summary, sink) = run_pipeline(&parts, &request(Language::PlainText, false))
            .await
            .unwrap();

        assert_eq!(summary.status, PipelineStatus::DeployFailed);
        assert!(!summary.ok());
        assert!(summary.health.is_none());
        assert!(summary.deployment_error.is_some());
        assert!(matches!(
            sink.kinds().last(),
            Some(PipelineEventKind::DeploymentFailed { .. })
        ));
    }

    #[tokio::test]
    async fn generator_errors_are_returned() {
        let fx = fixture();
        let generator = Generator::new(Arc::new(ScriptedBackend::new(vec![Err(
            anyhow::anyhow!("503 Service Unavailable"),
        )])));
        let executor = local_executor(Runtime::default());
        let parts = Components {
            generator: &generator,
            executor: &executor,
            deployer: &fx.deployer,
            monitor: &fx.monitor,
        };

        let err = run_pipeline(&parts, &request(Language::Python, true))
            .await
            .err()
            .expect("should fail");

        assert!(matches!(err, GeneratorError::Upstream { .. }));
        assert!(fx.deployer.list_deployments().is_empty());
    }

    #[tokio::test]
    async fn isolation_fallback_is_reported() {
        let fx = fixture();
        let generator = Generator::new(Arc::new(ScriptedBackend::replying(&["text"])));
        let executor = Executor::new(ExecutorSettings {
            use_container: true,
            runtime: Runtime {
                docker: "/nonexistent/gptbuilder-docker".to_string(),
                ..Runtime::default()
            },
            ..ExecutorSettings::default()
        })
        .await;
        let parts = Components {
            generator: &generator,
            executor: &executor,
            deployer: &fx.deployer,
            monitor: &fx.monitor,
        };

        let (_summary, sink) = run_pipeline(&parts, &request(Language::PlainText, true))
            .await
            .unwrap();

        assert!(sink
            .kinds()
            .iter()
            .any(|k| matches!(k, PipelineEventKind::IsolationFallback { .. })));
    }
}
