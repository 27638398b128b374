// tests/pipeline.rs

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use gptbuilder::deployer::Deployer;
use gptbuilder::engine::events::PipelineEventKind;
use gptbuilder::engine::{run_pipeline, Components, PipelineRequest, PipelineStatus};
use gptbuilder::executor::{Executor, ExecutorSettings};
use gptbuilder::generator::{Completion, CompletionBackend, CompletionRequest, Generator};
use gptbuilder::language::Language;
use gptbuilder::monitor::{HealthStatus, Monitor};

const PRIME_CHECKER: &str = r#"def is_prime(n: int) -> bool:
    """Return True when n is a prime number."""
    if n < 2:
        return False
    i = 2
    while i * i <= n:
        if n % i == 0:
            return False
        i += 1
    return True


if __name__ == "__main__":
    assert is_prime(2) and is_prime(13) and not is_prime(15)
    print("prime checks passed")
"#;

/// Hands out canned replies in order.
struct CannedBackend {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<CompletionRequest>>,
}

impl CannedBackend {
    fn new(replies: &[&str]) -> Self {
        Self {
            replies: Mutex::new(replies.iter().map(|r| r.to_string()).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl CompletionBackend for CannedBackend {
    fn model(&self) -> &str {
        "canned"
    }

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion> {
        self.prompts.lock().unwrap().push(request);
        let text = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow::anyhow!("no canned reply left"))?;
        Ok(Completion {
            text,
            tokens_used: 321,
        })
    }
}

fn python_available() -> bool {
    std::process::Command::new("python3")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn local_executor() -> Executor {
    Executor::local(ExecutorSettings {
        use_container: false,
        ..ExecutorSettings::default()
    })
}

#[tokio::test]
async fn prime_checker_is_generated_run_deployed_and_healthy() {
    if !python_available() {
        return;
    }

    let root = tempfile::tempdir().unwrap();
    let backend = Arc::new(CannedBackend::new(&[PRIME_CHECKER]));
    let generator = Generator::new(backend.clone());
    let executor = local_executor();
    let deployer = Deployer::new(root.path()).unwrap();
    let monitor = Monitor::new("python3");

    let parts = Components {
        generator: &generator,
        executor: &executor,
        deployer: &deployer,
        monitor: &monitor,
    };
    let request = PipelineRequest {
        requirement: "write a function returning true for prime numbers".to_string(),
        language: Language::Python,
        name: "prime_checker".to_string(),
        context: None,
        execute: true,
    };

    let (summary, sink) = run_pipeline(&parts, &request).await.unwrap();

    assert_eq!(summary.status, PipelineStatus::Deployed);
    assert_eq!(summary.executions.len(), 1);
    assert!(summary.executions[0].success);
    assert!(summary.executions[0].stdout.contains("prime checks passed"));
    assert!(!summary.refined);

    let deployment = summary.deployment.as_ref().unwrap();
    assert!(deployment.deployment_name.starts_with("prime_checker_"));
    assert!(deployment.deployment_path.join("main.py").is_file());

    let health = summary.health.as_ref().unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(health.syntax_valid, Some(true));

    let listed = deployer.list_deployments();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, deployment.deployment_name);
    assert_eq!(listed[0].metadata["execution_tested"], true);
    assert_eq!(listed[0].metadata["tokens_used"], 321);

    let history = monitor.health_history(&deployment.deployment_name, 1);
    assert_eq!(history.len(), 1);

    let prompts = backend.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].user.contains("prime numbers"));
    assert!(prompts[0]
        .system
        .as_deref()
        .unwrap()
        .contains("expert python developer"));

    assert!(matches!(
        sink.kinds().last(),
        Some(PipelineEventKind::HealthChecked {
            status: HealthStatus::Healthy
        })
    ));
}

#[tokio::test]
async fn broken_code_is_refined_and_the_fix_is_deployed() {
    if !python_available() {
        return;
    }

    let root = tempfile::tempdir().unwrap();
    let backend = Arc::new(CannedBackend::new(&[
        "raise RuntimeError('first draft')",
        "print('fixed')",
    ]));
    let generator = Generator::new(backend.clone());
    let executor = local_executor();
    let deployer = Deployer::new(root.path()).unwrap();
    let monitor = Monitor::new("python3");

    let parts = Components {
        generator: &generator,
        executor: &executor,
        deployer: &deployer,
        monitor: &monitor,
    };
    let request = PipelineRequest {
        requirement: "print fixed".to_string(),
        language: Language::Python,
        name: "fixer".to_string(),
        context: Some("runs as a script".to_string()),
        execute: true,
    };

    let (summary, _sink) = run_pipeline(&parts, &request).await.unwrap();

    assert!(summary.refined);
    assert_eq!(summary.executions.len(), 2);
    assert!(!summary.executions[0].success);
    assert!(summary.executions[1].success);
    assert!(summary.execution_tested());
    assert!(summary.ok());

    let code_file = &summary.deployment.as_ref().unwrap().code_file;
    assert_eq!(std::fs::read_to_string(code_file).unwrap(), "print('fixed')");

    let prompts = backend.prompts.lock().unwrap();
    assert!(prompts[0].user.contains("Context:\nruns as a script"));
    assert!(prompts[1].user.contains("The code failed with error:"));
    assert!(prompts[1].user.contains("RuntimeError"));
}
