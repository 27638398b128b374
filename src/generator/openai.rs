// src/generator/openai.rs

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use serde_json::Value as JsonValue;

use super::{Completion, CompletionBackend, CompletionRequest};
use crate::config::Config;
use crate::errors::GeneratorError;

/// OpenAI-compatible `/chat/completions` client.
pub struct OpenAiBackend {
    client: reqwest::Client,
    headers: HeaderMap,
    base_url: String,
    model: String,
}

impl OpenAiBackend {
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Result<Self, GeneratorError> {
        if api_key.trim().is_empty() {
            return Err(GeneratorError::Configuration(
                "OpenAI API key not configured".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            headers: auth_headers(api_key)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, GeneratorError> {
        let key = cfg.openai_api_key.as_deref().ok_or_else(|| {
            GeneratorError::Configuration(
                "OpenAI API key not configured (set OPENAI_API_KEY)".to_string(),
            )
        })?;

        Self::new(key, &cfg.openai_model, &cfg.openai_base_url)
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

fn auth_headers(api_key: &str) -> Result<HeaderMap, GeneratorError> {
    let mut headers = HeaderMap::new();
    let bearer = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())).map_err(|_| {
        GeneratorError::Configuration("OpenAI API key contains invalid characters".to_string())
    })?;
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    Ok(headers)
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion> {
        let body = request_body(&self.model, &request);

        tracing::debug!(model = %self.model, "sending chat completion request");

        let resp = self
            .client
            .post(self.endpoint())
            .headers(self.headers.clone())
            .json(&body)
            .send()
            .await
            .context("Failed to call chat completions endpoint")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();

        if !status.is_success() {
            bail!("Chat completion failed: {} {}", status, text);
        }

        parse_response(&text)
    }
}

/* ---------------- wire format ---------------- */

fn request_body(model: &str, request: &CompletionRequest) -> JsonValue {
    let mut messages = Vec::new();
    if let Some(system) = &request.system {
        messages.push(serde_json::json!({ "role": "system", "content": system }));
    }
    messages.push(serde_json::json!({ "role": "user", "content": request.user }));

    serde_json::json!({
        "model": model,
        "messages": messages,
        "temperature": request.temperature,
    })
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

fn parse_response(raw: &str) -> Result<Completion> {
    let parsed: ChatResponse =
        serde_json::from_str(raw).context("Chat completion returned invalid JSON")?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .context("Chat completion returned no choices")?;

    Ok(Completion {
        text: choice.message.content.unwrap_or_default(),
        tokens_used: parsed.usage.map(|u| u.total_tokens).unwrap_or(0),
    })
}
