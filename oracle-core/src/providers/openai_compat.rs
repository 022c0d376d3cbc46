//! OpenAI-compatible LLM provider.
//!
//! Supports OpenAI, Azure OpenAI, Ollama, vLLM, LM Studio, and any
//! endpoint that follows the OpenAI chat completions API format.

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, Role, TokenUsage};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;

/// OpenAI-compatible LLM provider.
pub struct OpenAiCompatibleProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    context_window: usize,
}

impl OpenAiCompatibleProvider {
    /// Create a new provider from configuration.
    ///
    /// Uses `config.api_key` when set, otherwise the environment variable named
    /// by `config.api_key_env`. Local endpoints work without a key.
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let is_local = config
            .base_url
            .as_ref()
            .map(|u| u.contains("localhost") || u.contains("127.0.0.1"))
            .unwrap_or(false);

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(&config.api_key_env).ok())
            .or_else(|| {
                if is_local {
                    debug!("No API key set for local provider; using dummy bearer token");
                    Some("local".to_string())
                } else {
                    None
                }
            })
            .ok_or_else(|| LlmError::AuthFailed {
                provider: format!(
                    "OpenAI-compatible: env var '{}' not set",
                    config.api_key_env
                ),
            })?;

        Ok(Self::new_with_key(config, api_key))
    }

    /// Create a new provider with an explicitly provided API key.
    pub fn new_with_key(config: &LlmConfig, api_key: String) -> Self {
        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string())
            .trim_end_matches('/')
            .to_string();

        Self {
            client: Client::new(),
            base_url,
            api_key,
            model: config.model.clone(),
            context_window: config.context_window,
        }
    }

    /// Convert internal messages to OpenAI JSON format.
    fn messages_to_json(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content,
                })
            })
            .collect()
    }

    /// Parse an OpenAI-format response body into a CompletionResponse.
    fn parse_response(body: &Value, model: &str) -> Result<CompletionResponse, LlmError> {
        let choice =
            body.get("choices")
                .and_then(|c| c.get(0))
                .ok_or_else(|| LlmError::ResponseParse {
                    message: "No choices in response".to_string(),
                })?;

        let message = choice
            .get("message")
            .ok_or_else(|| LlmError::ResponseParse {
                message: "No message in choice".to_string(),
            })?;

        let text = message
            .get("content")
            .and_then(|c| c.as_str())
            .unwrap_or_default();

        let finish_reason = choice
            .get("finish_reason")
            .and_then(|f| f.as_str())
            .map(|s| s.to_string());

        let usage_obj = body.get("usage");
        let usage = TokenUsage {
            input_tokens: usage_obj
                .and_then(|u| u.get("prompt_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
            output_tokens: usage_obj
                .and_then(|u| u.get("completion_tokens"))
                .and_then(|t| t.as_u64())
                .unwrap_or(0) as usize,
        };

        let resp_model = body
            .get("model")
            .and_then(|m| m.as_str())
            .unwrap_or(model)
            .to_string();

        Ok(CompletionResponse {
            message: Message::new(Role::Assistant, text),
            usage,
            model: resp_model,
            finish_reason,
        })
    }

    fn map_http_error(status: reqwest::StatusCode, body: &str) -> LlmError {
        match status.as_u16() {
            401 | 403 => {
                debug!(body = %body, "Authentication failed");
                LlmError::AuthFailed {
                    provider: "OpenAI-compatible".to_string(),
                }
            }
            429 => {
                // "Rate limit reached ... Please try again in 20s"
                let retry_secs = serde_json::from_str::<Value>(body)
                    .ok()
                    .and_then(|v| {
                        v.get("error")?
                            .get("message")?
                            .as_str()
                            .map(|s| s.to_string())
                    })
                    .and_then(|msg| {
                        msg.split("in ").last().and_then(|s| {
                            s.trim_end_matches('.')
                                .trim_end_matches('s')
                                .parse::<u64>()
                                .ok()
                        })
                    })
                    .unwrap_or(5);
                LlmError::RateLimited {
                    retry_after_secs: retry_secs,
                }
            }
            code if code >= 500 => LlmError::Connection {
                message: format!("Server error ({status}): {body}"),
            },
            _ => LlmError::ApiRequest {
                message: format!("HTTP {status}: {body}"),
            },
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleProvider {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.model),
            "messages": Self::messages_to_json(&request.messages),
            "temperature": request.temperature,
            "stream": false,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if request.json_mode {
            body["response_format"] = json!({"type": "json_object"});
        }

        debug!(url = %url, model = %self.model, "Sending OpenAI completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Connection {
                message: format!("Request failed: {e}"),
            })?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| LlmError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(Self::map_http_error(status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| LlmError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        Self::parse_response(&json, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }
}
