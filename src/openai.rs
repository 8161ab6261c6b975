//! OpenAI embedding and completion adapters.
//!
//! Both adapters share one `reqwest::Client` and hold no credential. The
//! key and deadline for each call arrive in the [`UpstreamCall`], so a
//! caller-supplied key only ever reaches that caller's own requests.
//!
//! # Error Mapping
//!
//! - HTTP 401 / 403 → [`UpstreamError::InvalidCredential`]
//! - HTTP 429 → [`UpstreamError::RateLimited`]
//! - other non-2xx → [`UpstreamError::Api`]
//! - request deadline exceeded → [`UpstreamError::Timeout`]
//! - other transport failure → [`UpstreamError::Network`]
//!
//! No call is retried.

use async_trait::async_trait;
use askdocs_core::completion::CompletionInvoker;
use askdocs_core::embedding::{Embedder, UpstreamCall};
use askdocs_core::error::UpstreamError;
use askdocs_core::models::Credential;
use serde_json::json;
use tracing::warn;

use crate::config::{CompletionConfig, EmbeddingConfig};

/// Environment variable holding the service's own API key.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Read the service credential from [`API_KEY_ENV`].
pub fn service_credential() -> anyhow::Result<Credential> {
    let key = std::env::var(API_KEY_ENV)
        .map_err(|_| anyhow::anyhow!("{} not set", API_KEY_ENV))?;
    if key.trim().is_empty() {
        anyhow::bail!("{} is empty", API_KEY_ENV);
    }
    Ok(Credential::new(key.trim()))
}

fn transport_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() {
        UpstreamError::Timeout
    } else {
        UpstreamError::Network(e.to_string())
    }
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
    call: UpstreamCall<'_>,
) -> Result<serde_json::Value, UpstreamError> {
    let response = client
        .post(url)
        .bearer_auth(call.credential.expose())
        .timeout(call.timeout)
        .json(body)
        .send()
        .await
        .map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
        let body_text = response.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), url, "OpenAI API error");
        return Err(UpstreamError::from_status(status.as_u16(), body_text));
    }

    response.json().await.map_err(|e| {
        if e.is_timeout() {
            UpstreamError::Timeout
        } else {
            UpstreamError::Malformed(e.to_string())
        }
    })
}

// ============ Embeddings ============

/// Calls `POST {base_url}/embeddings`.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
}

impl OpenAIEmbedder {
    pub fn new(client: reqwest::Client, config: &EmbeddingConfig, model: String) -> Self {
        Self {
            client,
            url: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model,
        }
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, text: &str, call: UpstreamCall<'_>) -> Result<Vec<f32>, UpstreamError> {
        let body = json!({
            "model": self.model,
            "input": text,
        });
        let json = post_json(&self.client, &self.url, &body, call).await?;
        parse_embedding_response(&json)
    }
}

/// Extract `data[0].embedding`.
fn parse_embedding_response(json: &serde_json::Value) -> Result<Vec<f32>, UpstreamError> {
    let embedding = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .and_then(|e| e.as_array())
        .ok_or_else(|| UpstreamError::Malformed("missing data[0].embedding".into()))?;

    embedding
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| UpstreamError::Malformed("non-numeric embedding value".into()))
        })
        .collect()
}

// ============ Completions ============

/// Calls `POST {base_url}/completions`.
pub struct OpenAICompletion {
    client: reqwest::Client,
    url: String,
    model: String,
    temperature: f32,
}

impl OpenAICompletion {
    pub fn new(client: reqwest::Client, config: &CompletionConfig) -> Self {
        Self {
            client,
            url: format!("{}/completions", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }
}

#[async_trait]
impl CompletionInvoker for OpenAICompletion {
    async fn complete(
        &self,
        prompt: &str,
        max_answer_tokens: usize,
        call: UpstreamCall<'_>,
    ) -> Result<String, UpstreamError> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "max_tokens": max_answer_tokens,
            "temperature": self.temperature,
        });
        let json = post_json(&self.client, &self.url, &body, call).await?;
        parse_completion_response(&json)
    }
}

/// Extract and trim `choices[0].text`.
fn parse_completion_response(json: &serde_json::Value) -> Result<String, UpstreamError> {
    json.get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|choice| choice.get("text"))
        .and_then(|t| t.as_str())
        .map(|t| t.trim().to_string())
        .ok_or_else(|| UpstreamError::Malformed("missing choices[0].text".into()))
}
