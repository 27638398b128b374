use crate::monitor::HealthStatus;
use crate::run_id::RunId;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineEventKind {
    RunCreated,
    /// Containers were requested but the executor runs locally.
    IsolationFallback { reason: String },
    GenerationStarted,
    GenerationFinished { tokens_used: u64 },
    ExecutionStarted { attempt: u32 },
    ExecutionFinished { attempt: u32, success: bool, return_code: i32 },
    RefinementStarted,
    RefinementFinished,
    DeploymentFinished { deployment_name: String },
    DeploymentFailed { deployment_name: String, error: String },
    HealthChecked { status: HealthStatus },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PipelineEvent {
    pub run_id: RunId,
    #[serde(flatten)]
    pub kind: PipelineEventKind,
    pub timestamp: SystemTime,
}

impl PipelineEvent {
    pub fn new(run_id: &RunId, kind: PipelineEventKind) -> Self {
        Self {
            run_id: run_id.clone(),
            kind,
            timestamp: SystemTime::now(),
        }
    }
}

pub fn run_created(run_id: &RunId) -> PipelineEvent {
    PipelineEvent::new(run_id, PipelineEventKind::RunCreated)
}
