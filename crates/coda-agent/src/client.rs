//! Anthropic API client
//!
//! Each call is a single user message with no conversation history.

use crate::auth;
use crate::circuit_breaker::CircuitBreaker;
use crate::types::{AnthropicMessage, AnthropicRequest, AnthropicResponse, Completion, Model, Usage};
use chrono::Utc;
use coda_core::{CodaError, Result};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

const ANTHROPIC_API_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: usize = 16000;

// Rate limit retry configuration
const MAX_RETRIES: u32 = 5;
const INITIAL_BACKOFF_SECS: u64 = 30;
const MAX_BACKOFF_SECS: u64 = 300;

// Shared across every client in the process
static CIRCUIT_BREAKER: OnceLock<CircuitBreaker> = OnceLock::new();

fn get_circuit_breaker() -> &'static CircuitBreaker {
    CIRCUIT_BREAKER.get_or_init(CircuitBreaker::default)
}

/// Stateless model client that tracks cumulative token usage
#[derive(Debug, Clone)]
pub struct AgentClient {
    model: Model,
    max_tokens: usize,
    usage: Arc<Mutex<Usage>>,
}

impl AgentClient {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            usage: Arc::new(Mutex::new(Usage::default())),
        }
    }

    /// Set max tokens for responses
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> Model {
        self.model
    }

    /// Send one prompt and return the response text
    pub async fn complete(&self, prompt: &str) -> Result<String> {
        let completion = send_prompt(prompt, self.model, self.max_tokens).await?;
        if let Some(usage) = completion.usage {
            if let Ok(mut total) = self.usage.lock() {
                *total += usage;
            }
        }
        Ok(completion.text)
    }

    /// Tokens consumed by every call made through this client and its clones
    pub fn total_usage(&self) -> Usage {
        self.usage.lock().map(|u| *u).unwrap_or_default()
    }
}

impl Default for AgentClient {
    fn default() -> Self {
        Self::new(Model::default())
    }
}

/// Send a single-message request to the Messages API
///
/// Retries HTTP 429 (honouring `retry-after`) and 5xx responses with
/// exponential backoff. Other failures count against the shared circuit
/// breaker; while it is open, calls fail immediately with `ApiLimit`.
pub async fn send_prompt(prompt: &str, model: Model, max_tokens: usize) -> Result<Completion> {
    tracing::debug!("Model call: {} ({} prompt chars)", model, prompt.len());

    let circuit_breaker = get_circuit_breaker();

    if !circuit_breaker.can_execute() {
        return Err(CodaError::ApiLimit(format!(
            "Circuit breaker is OPEN after repeated API failures. Wait {} seconds before retry.",
            circuit_breaker.time_until_retry().as_secs()
        )));
    }

    let auth_token = auth::get_auth_token()?;

    let request = AnthropicRequest {
        model: model.api_name().to_string(),
        max_tokens,
        messages: vec![AnthropicMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        }],
    };

    let client = reqwest::Client::new();
    let mut retries = 0;
    let mut backoff_secs = INITIAL_BACKOFF_SECS;

    loop {
        tracing::debug!("Sending request to Anthropic API (attempt {})", retries + 1);

        let response = client
            .post(ANTHROPIC_API_URL)
            .header("x-api-key", &auth_token)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CodaError::Api(format!("Failed to send request: {}", e)))?;

        let status = response.status();

        if status.as_u16() == 429 {
            retries += 1;

            if retries > MAX_RETRIES {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown".to_string());
                return Err(CodaError::ApiLimit(format!(
                    "Rate limit exceeded after {} retries. Last error: {}",
                    MAX_RETRIES, error_text
                )));
            }

            let wait_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(backoff_secs);

            tracing::warn!(
                "Rate limited (429). Waiting {} seconds before retry {}/{}",
                wait_secs,
                retries,
                MAX_RETRIES
            );

            tokio::time::sleep(Duration::from_secs(wait_secs)).await;
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
            continue;
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown".to_string());

            if status.is_server_error() && retries < MAX_RETRIES {
                retries += 1;
                tracing::warn!(
                    "Server error ({}). Waiting {} seconds before retry {}/{}",
                    status,
                    backoff_secs,
                    retries,
                    MAX_RETRIES
                );
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
                backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                continue;
            }

            circuit_breaker.record_failure();
            tracing::error!(
                "Circuit breaker: recorded failure (count: {})",
                circuit_breaker.failure_count()
            );

            return Err(CodaError::Api(format!(
                "Anthropic API error {}: {}",
                status, error_text
            )));
        }

        let anthropic_response: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| CodaError::Api(format!("Failed to parse response: {}", e)))?;

        let text = anthropic_response.text();
        if text.trim().is_empty() {
            return Err(CodaError::InvalidResponse(
                "No text content in response".to_string(),
            ));
        }

        circuit_breaker.record_success();

        let usage = anthropic_response.usage;
        match usage {
            Some(u) => tracing::debug!(
                "Model call complete ({} chars, {} input tokens, {} output tokens)",
                text.len(),
                u.input_tokens,
                u.output_tokens
            ),
            None => tracing::debug!("Model call complete ({} chars)", text.len()),
        }

        return Ok(Completion {
            text,
            timestamp: Utc::now(),
            usage,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_client_builder() {
        let client = AgentClient::new(Model::Opus).with_max_tokens(8000);
        assert_eq!(client.model(), Model::Opus);
        assert_eq!(client.max_tokens, 8000);
        assert_eq!(client.total_usage(), Usage::default());
    }

    #[test]
    fn test_clones_share_usage() {
        let client = AgentClient::default();
        let clone = client.clone();
        if let Ok(mut total) = client.usage.lock() {
            *total += Usage {
                input_tokens: 4,
                output_tokens: 2,
            };
        }
        assert_eq!(clone.total_usage().input_tokens, 4);
    }
}
