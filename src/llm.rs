use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

/// Text-in, text-out access to a generative model.
///
/// Both model calls in the pipeline go through this trait, so tests can swap
/// in deterministic implementations without touching the network.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

/// Client for the Gemini `generateContent` REST endpoint.
#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        Self::new(
            config.api_key.clone(),
            config.model.clone(),
            config.base_url.clone(),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model)
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let body = serde_json::json!({
            "contents": [
                {"role": "user", "parts": [{"text": prompt}]}
            ]
        });

        debug!(model = %self.model, prompt_len = prompt.len(), "calling generative model");

        let response = self
            .http
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Generation(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AgentError::Generation(format!(
                "LLM API error ({}): {}",
                status, error_text
            )));
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Generation(format!("Failed to parse LLM response: {}", e)))?;

        extract_text(&response_json)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Pull the candidate text out of a `generateContent` response body.
pub fn extract_text(response_json: &Value) -> Result<String> {
    if let Some(error) = response_json.get("error") {
        let message = error
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(AgentError::Generation(format!("LLM API error: {}", message)));
    }

    if let Some(reason) = response_json
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str())
    {
        return Err(AgentError::Generation(format!("Prompt was blocked: {}", reason)));
    }

    let candidate = response_json
        .pointer("/candidates/0")
        .ok_or_else(|| AgentError::Generation("No candidates in LLM response".to_string()))?;

    if let Some(finish_reason) = candidate.get("finishReason").and_then(|r| r.as_str()) {
        if finish_reason == "MAX_TOKENS" {
            warn!("LLM response was truncated due to length limit");
        }
    }

    let parts = candidate
        .pointer("/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| AgentError::Generation("No content in LLM response".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|t| t.as_str()))
        .collect();

    if text.is_empty() {
        return Err(AgentError::Generation("Empty content in LLM response".to_string()));
    }

    Ok(text)
}
