// src/generator/mod.rs

//! Code generation through a chat-style completion backend.
//!
//! The generator only builds prompts and maps responses. The text that comes
//! back is used verbatim as code; nothing is parsed or validated.

pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::GeneratorError;
use crate::language::Language;

pub use openai::OpenAiBackend;

/// Sampling temperature for every call.
pub const TEMPERATURE: f32 = 0.7;

/// One chat completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub system: Option<String>,
    pub user: String,
    pub temperature: f32,
}

/// Text and accounting returned by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    pub tokens_used: u64,
}

#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Model identifier reported in generation results.
    fn model(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub code: String,
    pub language: Language,
    pub requirement: String,
    pub model: String,
    pub tokens_used: u64,
}

#[derive(Clone)]
pub struct Generator {
    backend: Arc<dyn CompletionBackend>,
}

impl Generator {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self { backend }
    }

    /// Build a generator on the OpenAI backend.
    ///
    /// Fails with `GeneratorError::Configuration` when no API key is set.
    pub fn from_config(cfg: &crate::config::Config) -> Result<Self, GeneratorError> {
        let backend = OpenAiBackend::from_config(cfg)?;
        Ok(Self::new(Arc::new(backend)))
    }

    pub fn model(&self) -> &str {
        self.backend.model()
    }

    pub async fn generate(
        &self,
        requirement: &str,
        language: Language,
        context: Option<&str>,
    ) -> Result<GenerationResult, GeneratorError> {
        let request = CompletionRequest {
            system: Some(system_prompt(language)),
            user: requirement_prompt(requirement, context),
            temperature: TEMPERATURE,
        };

        let completion = self.call("generate", request).await?;
        tracing::info!(
            language = %language,
            tokens = completion.tokens_used,
            "code generated"
        );

        Ok(GenerationResult {
            code: completion.text,
            language,
            requirement: requirement.to_string(),
            model: self.backend.model().to_string(),
            tokens_used: completion.tokens_used,
        })
    }

    /// Regenerate `code` as a whole, steered by `feedback`.
    pub async fn refine(
        &self,
        code: &str,
        feedback: &str,
        language: Language,
    ) -> Result<String, GeneratorError> {
        let request = CompletionRequest {
            system: None,
            user: refine_prompt(code, feedback, language),
            temperature: TEMPERATURE,
        };

        Ok(self.call("refine", request).await?.text)
    }

    pub async fn generate_tests(
        &self,
        code: &str,
        language: Language,
    ) -> Result<String, GeneratorError> {
        let request = CompletionRequest {
            system: None,
            user: tests_prompt(code, language),
            temperature: TEMPERATURE,
        };

        Ok(self.call("generate_tests", request).await?.text)
    }

    async fn call(
        &self,
        operation: &'static str,
        request: CompletionRequest,
    ) -> Result<Completion, GeneratorError> {
        self.backend.complete(request).await.map_err(|source| {
            tracing::error!(operation, error = %source, "completion call failed");
            GeneratorError::Upstream {
                operation,
                source: source.into(),
            }
        })
    }
}

/* ---------------- prompts ---------------- */

fn system_prompt(language: Language) -> String {
    format!(
        "You are an expert {language} developer.\n\
         Generate clean, well-documented, production-ready code based on the user's requirements.\n\
         Include error handling, type hints, and follow best practices."
    )
}

fn requirement_prompt(requirement: &str, context: Option<&str>) -> String {
    let mut prompt = format!("Requirement: {requirement}");
    if let Some(ctx) = context.filter(|c| !c.is_empty()) {
        prompt.push_str("\n\nContext:\n");
        prompt.push_str(ctx);
    }
    prompt
}

fn refine_prompt(code: &str, feedback: &str, language: Language) -> String {
    format!(
        "Here is some {language} code:\n\n\
         ```{language}\n{code}\n```\n\n\
         Please refine this code based on the following feedback:\n{feedback}\n\n\
         Provide only the refined code without explanations."
    )
}

fn tests_prompt(code: &str, language: Language) -> String {
    format!(
        "Generate comprehensive unit tests for this {language} code:\n\n\
         ```{language}\n{code}\n```\n\n\
         Include edge cases and error conditions. Use pytest for Python."
    )
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Backend that replays canned responses and records every request.
    pub struct ScriptedBackend {
        responses: Mutex<VecDeque<anyhow::Result<Completion>>>,
        pub requests: Mutex<Vec<CompletionRequest>>,
    }

    impl ScriptedBackend {
        pub fn new(responses: Vec<anyhow::Result<Completion>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn replying(texts: &[&str]) -> Self {
            Self::new(
                texts
                    .iter()
                    .map(|t| {
                        Ok(Completion {
                            text: t.to_string(),
                            tokens_used: 100,
                        })
                    })
                    .collect(),
            )
        }

        pub fn recorded(&self) -> Vec<CompletionRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for ScriptedBackend {
        fn model(&self) -> &str {
            "scripted-model"
        }

        async fn complete(&self, request: CompletionRequest) -> anyhow::Result<Completion> {
            self.requests.lock().unwrap().push(request);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted response left")))
        }
    }
}
