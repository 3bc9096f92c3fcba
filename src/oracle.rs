//! Text-completion oracle client.
//!
//! The pipeline only ever sees the [`CompletionClient`] trait, so tests can
//! substitute a deterministic stub and the pipeline logic stays fully
//! deterministic given fixed completions.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::OracleConfig;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("completion request timed out")]
    Timeout,
    #[error("completion service rate limit reached")]
    RateLimited,
    #[error("completion service error: {0}")]
    Api(String),
}

/// One logical call type: (system prompt, user prompt) -> completion text.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str)
        -> Result<String, OracleError>;
}

/// Client for an OpenAI-compatible chat completions endpoint (Groq by
/// default). The API key is held in memory only and never logged.
pub struct GroqClient {
    base_url: String,
    model: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

impl GroqClient {
    pub fn new(config: &OracleConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl CompletionClient for GroqClient {
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, OracleError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = serde_json::json!({
            "model": &self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt}
            ],
            "temperature": 0.1,
            "max_tokens": 4000
        });

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OracleError::Timeout
                } else {
                    // reqwest error strings do not contain request headers,
                    // so the key cannot leak here.
                    OracleError::Api(e.to_string())
                }
            })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(OracleError::RateLimited);
        }
        if !status.is_success() {
            // Surface the status only; upstream bodies are not forwarded.
            return Err(OracleError::Api(format!(
                "completion endpoint returned {}",
                status
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::Api(format!("unreadable completion response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| OracleError::Api("completion response had no choices".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_builds_with_defaults() {
        let config = OracleConfig::default();
        let client = GroqClient::new(&config, "test-key".into()).unwrap();
        assert_eq!(client.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(client.model, "llama-3.3-70b-versatile");
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let config = OracleConfig {
            base_url: "http://localhost:11434/v1/".into(),
            ..OracleConfig::default()
        };
        let client = GroqClient::new(&config, "k".into()).unwrap();
        assert_eq!(client.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn test_chat_response_parsing() {
        let json = r#"{"choices":[{"message":{"content":"  hello  "}}]}"#;
        let parsed: ChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.choices[0].message.content, "  hello  ");
    }
}
