// src/errors.rs

//! Typed errors at component boundaries.
//!
//! Only the generator raises errors to its caller. Execution problems are
//! folded into `ExecutionResult`, health problems into `HealthRecord`, and
//! deployment problems come back as a `DeploymentFailure` value.

use serde::Serialize;
use thiserror::Error;

/// Errors from the code generator.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// No usable credential or backend settings.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The completion call itself failed. Never retried here.
    #[error("Upstream completion call failed during {operation}: {source}")]
    Upstream {
        operation: &'static str,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// A deployment that could not be completed.
///
/// The deployment directory may be partially written; nothing is rolled back.
#[derive(Debug, Clone, Error, Serialize)]
#[error("Deployment {deployment_name} failed: {error}")]
pub struct DeploymentFailure {
    pub deployment_name: String,
    pub error: String,
}

impl DeploymentFailure {
    pub fn new(deployment_name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            deployment_name: deployment_name.into(),
            error: error.to_string(),
        }
    }
}
