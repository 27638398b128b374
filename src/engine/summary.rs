use crate::deployer::Deployment;
use crate::errors::DeploymentFailure;
use crate::executor::ExecutionResult;
use crate::generator::GenerationResult;
use crate::monitor::{HealthRecord, HealthStatus};
use crate::run_id::RunId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineStatus {
    Deployed,
    DeployFailed,
}

/// Everything one `auto` run produced.
#[derive(Debug, Serialize)]
pub struct PipelineSummary {
    pub run_id: RunId,
    pub status: PipelineStatus,
    pub generation: GenerationResult,
    /// Code that was deployed. Differs from `generation.code` after a refine.
    pub final_code: String,
    pub refined: bool,
    /// One entry per execution attempt, at most two.
    pub executions: Vec<ExecutionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<Deployment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment_error: Option<DeploymentFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health: Option<HealthRecord>,
}

impl PipelineSummary {
    /// Whether the last execution attempt succeeded. `false` when nothing ran.
    pub fn execution_tested(&self) -> bool {
        self.executions.last().is_some_and(|r| r.success)
    }

    /// Deployed and not reported unhealthy.
    pub fn ok(&self) -> bool {
        self.status == PipelineStatus::Deployed
            && self
                .health
                .as_ref()
                .is_some_and(|h| h.status != HealthStatus::Error)
    }
}
