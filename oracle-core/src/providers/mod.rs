//! LLM provider implementations.
//!
//! Every supported provider speaks the OpenAI chat completions format:
//! OpenAI itself plus local servers (Ollama, vLLM, LM Studio).
//!
//! Use `create_provider()` to instantiate the appropriate provider based on config.

pub mod openai_compat;

use crate::brain::LlmProvider;
use crate::config::LlmConfig;
use crate::error::LlmError;
use std::sync::Arc;

pub use openai_compat::OpenAiCompatibleProvider;

/// Default base URLs for well-known OpenAI-compatible local servers.
fn default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "ollama" => Some("http://localhost:11434/v1"),
        "lmstudio" | "lm-studio" => Some("http://localhost:1234/v1"),
        "vllm" => Some("http://localhost:8000/v1"),
        _ => None,
    }
}

/// Instantiate the provider named in `config.provider`.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = config.provider.to_lowercase();
    match provider.as_str() {
        "openai" | "azure" | "openai-compatible" => {
            Ok(Arc::new(OpenAiCompatibleProvider::new(config)?))
        }
        other => match default_base_url(other) {
            Some(url) => {
                let mut local = config.clone();
                if local.base_url.is_none() {
                    local.base_url = Some(url.to_string());
                }
                Ok(Arc::new(OpenAiCompatibleProvider::new(&local)?))
            }
            None => Err(LlmError::ApiRequest {
                message: format!("Unsupported LLM provider '{other}'"),
            }),
        },
    }
}
