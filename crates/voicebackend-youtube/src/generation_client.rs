//! Synchronous chat-completion client. One POST, one JSON body, one typed
//! failure kind: transport, HTTP, and decode errors all fold into
//! `LLM_REQUEST_FAILED`.

use crate::error::PipelineError;
use crate::job::GenerationConfig;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use voicebackend_common::truncate_text;

const RESPONSE_BODY_TRUNCATE_CHARS: usize = 2000;

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessageOut {
    pub role: &'static str,
    pub content: String,
}

pub struct GenerationClient {
    client: reqwest::blocking::Client,
    config: GenerationConfig,
}

impl GenerationClient {
    pub fn new(config: GenerationConfig) -> Self {
        let timeout = Duration::from_secs(config.timeout_sec.max(10));
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::blocking::Client::new());
        Self { client, config }
    }

    /// Resolve `<baseUrl>` into a concrete `/v1/chat/completions`-shaped
    /// endpoint, handling trailing slashes and an already-present suffix.
    pub fn resolve_endpoint(&self) -> String {
        let base = if self.config.base_url.trim().is_empty() {
            "http://127.0.0.1:1234"
        } else {
            self.config.base_url.trim()
        };
        let trimmed = base.trim_end_matches('/');
        if trimmed.ends_with("/chat/completions") {
            trimmed.to_string()
        } else if trimmed.ends_with("/v1") {
            format!("{trimmed}/chat/completions")
        } else {
            format!("{trimmed}/v1/chat/completions")
        }
    }

    pub fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String, PipelineError> {
        let endpoint = self.resolve_endpoint();
        let body = json!({
            "model": self.config.model,
            "temperature": temperature.clamp(0.0, 1.0),
            "messages": [
                { "role": "system", "content": system_prompt },
                { "role": "user", "content": user_prompt },
            ],
            "max_tokens": max_tokens.max(64),
        });

        let response = self
            .client
            .post(&endpoint)
            .json(&body)
            .send()
            .map_err(|e| PipelineError::llm_request_failed(format!("request failed: {e}")))?;

        let status = response.status();
        let raw_body = response
            .text()
            .map_err(|e| PipelineError::llm_request_failed(format!("failed to read response body: {e}")))?;

        if !status.is_success() {
            let (truncated, _) = truncate_text(&raw_body, RESPONSE_BODY_TRUNCATE_CHARS);
            return Err(PipelineError::llm_request_failed(format!(
                "non-2xx status {}",
                status.as_u16()
            ))
            .with_details(json!({ "statusCode": status.as_u16(), "responseBody": truncated })));
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&raw_body).map_err(|e| {
            let (truncated, _) = truncate_text(&raw_body, RESPONSE_BODY_TRUNCATE_CHARS);
            PipelineError::llm_request_failed(format!("invalid JSON response: {e}"))
                .with_details(json!({ "responseBody": truncated }))
        })?;

        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        if content.trim().is_empty() {
            let (truncated, _) = truncate_text(&raw_body, RESPONSE_BODY_TRUNCATE_CHARS);
            return Err(PipelineError::llm_request_failed("empty assistant content")
                .with_details(json!({ "responseBody": truncated })));
        }

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_base(base_url: &str) -> GenerationConfig {
        GenerationConfig {
            base_url: base_url.to_string(),
            ..GenerationConfig::default()
        }
    }

    #[test]
    fn resolves_bare_base_url() {
        let client = GenerationClient::new(config_with_base("http://127.0.0.1:1234"));
        assert_eq!(client.resolve_endpoint(), "http://127.0.0.1:1234/v1/chat/completions");
    }

    #[test]
    fn resolves_v1_suffixed_base_url() {
        let client = GenerationClient::new(config_with_base("http://localhost:8080/v1/"));
        assert_eq!(client.resolve_endpoint(), "http://localhost:8080/v1/chat/completions");
    }

    #[test]
    fn leaves_fully_qualified_endpoint_as_is() {
        let client = GenerationClient::new(config_with_base("http://localhost:8080/chat/completions"));
        assert_eq!(client.resolve_endpoint(), "http://localhost:8080/chat/completions");
    }

    #[test]
    fn blank_base_url_falls_back_to_default() {
        let client = GenerationClient::new(config_with_base("  "));
        assert_eq!(client.resolve_endpoint(), "http://127.0.0.1:1234/v1/chat/completions");
    }
}
