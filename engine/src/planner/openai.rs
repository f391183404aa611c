//! OpenAI-compatible plan backend
//!
//! Single call contract: POST `{base_url}/chat/completions` with the
//! configured model, return the first choice's message content. Status
//! mapping drives the queue's retry policy: 429 and 5xx are transient,
//! 401/403 are authentication failures, anything else is a generation
//! error.

use super::PlanBackend;
use crate::config::PlannerConfig;
use async_trait::async_trait;
use sdk::errors::AgentError;
use serde_json::json;
use tracing::debug;

pub struct OpenAiBackend {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiBackend {
    /// Builds the backend, reading the API key from the configured
    /// environment variable.
    pub fn from_config(config: &PlannerConfig) -> Result<Self, AgentError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AgentError::Config(format!(
                "Missing API key: set the {} environment variable",
                config.api_key_env
            ))
        })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            client: reqwest::Client::new(),
        })
    }

    #[cfg(test)]
    fn for_tests(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: "test-key".to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl PlanBackend for OpenAiBackend {
    fn name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String, AgentError> {
        let url = format!("{}/chat/completions", self.base_url);
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
        });

        debug!(model = %self.model, "requesting plan from reasoning service");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(|e| AgentError::Transient(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => AgentError::AuthenticationFailed(text),
                429 => AgentError::Transient("rate limited by reasoning service".to_string()),
                s if s >= 500 => AgentError::Transient(format!("server error {}: {}", s, text)),
                s => AgentError::Generation(format!("unexpected status {}: {}", s, text)),
            });
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AgentError::Generation(format!("malformed response: {}", e)))?;

        data.get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(String::from)
            .ok_or_else(|| AgentError::Generation("no content in response".to_string()))
    }
}
