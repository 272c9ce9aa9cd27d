//! Ollama Embedding Client
//!
//! Calls `POST /api/embed` on an Ollama server. One request per call; callers
//! decide whether to retry, using [`AgentError::is_retryable`]:
//! HTTP 429, 5xx, timeouts and connection failures map to
//! `ProviderUnavailable`, other client errors to `Provider`.

use std::time::Duration;

use agent_core::error::{AgentError, Result};
use agent_core::provider::EmbeddingProvider;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "ollama")]
use crate::ollama::OllamaConfig;

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// Embedding provider backed by Ollama
pub struct OllamaEmbedder {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl OllamaEmbedder {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    #[cfg(feature = "ollama")]
    pub fn from_config(config: &OllamaConfig) -> Result<Self> {
        Self::new(config.base_url(), &config.embedding_model, config.timeout())
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/api/embed", self.base_url);
        let response = self
            .client
            .post(&url)
            .json(&EmbedRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| {
                AgentError::ProviderUnavailable(format!(
                    "Ollama connection error (is Ollama running at {}?): {e}",
                    self.base_url
                ))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = format!("Ollama API error {status}: {body_text}");
            return Err(if status.as_u16() == 429 || status.is_server_error() {
                AgentError::ProviderUnavailable(message)
            } else {
                AgentError::Provider(message)
            });
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| AgentError::Provider(format!("Invalid Ollama response: {e}")))?;

        if parsed.embeddings.len() != texts.len() {
            return Err(AgentError::Provider(format!(
                "Ollama returned {} embeddings for {} inputs",
                parsed.embeddings.len(),
                texts.len()
            )));
        }

        tracing::debug!(model = %self.model, count = texts.len(), "Embedded texts");
        Ok(parsed.embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
