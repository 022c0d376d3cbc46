//! Brain module: LLM provider abstraction.
//!
//! Defines the `LlmProvider` trait for model-agnostic completions, a scripted
//! mock provider for tests and offline runs, and the helpers used to move text
//! safely into prompts and structured output back out of replies.

use crate::error::LlmError;
use crate::types::{CompletionRequest, CompletionResponse, Message, TokenUsage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

/// Trait for LLM providers.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Perform a full completion and return the response.
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;

    /// Return the model name.
    fn model_name(&self) -> &str;

    /// Return the context window size for this provider/model.
    fn context_window(&self) -> usize;
}

/// A provider that replays queued responses in order.
///
/// When the queue runs dry it answers with a fixed non-JSON sentence, which the
/// reasoner treats as unparseable output.
pub struct MockLlmProvider {
    model: String,
    context_window: usize,
    responses: Mutex<VecDeque<Result<CompletionResponse, LlmError>>>,
}

impl MockLlmProvider {
    pub fn new() -> Self {
        Self {
            model: "mock-model".to_string(),
            context_window: 128_000,
            responses: Mutex::new(VecDeque::new()),
        }
    }

    /// Create a MockLlmProvider that returns the given replies in order.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let provider = Self::new();
        for reply in replies {
            provider.queue_text(reply.as_ref());
        }
        provider
    }

    /// Queue a response to be returned by the next `complete` call.
    pub fn queue_response(&self, response: CompletionResponse) {
        self.lock().push_back(Ok(response));
    }

    /// Queue a plain text reply.
    pub fn queue_text(&self, text: &str) {
        self.queue_response(Self::text_response(text));
    }

    /// Queue a JSON reply.
    pub fn queue_json(&self, value: serde_json::Value) {
        self.queue_text(&value.to_string());
    }

    /// Queue a provider failure.
    pub fn queue_error(&self, error: LlmError) {
        self.lock().push_back(Err(error));
    }

    /// Number of replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.lock().len()
    }

    /// Create a simple text response for testing.
    pub fn text_response(text: &str) -> CompletionResponse {
        CompletionResponse {
            message: Message::assistant(text),
            usage: TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
            },
            model: "mock-model".to_string(),
            finish_reason: Some("stop".to_string()),
        }
    }

    fn lock(
        &self,
    ) -> std::sync::MutexGuard<'_, VecDeque<Result<CompletionResponse, LlmError>>> {
        self.responses.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MockLlmProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        match self.lock().pop_front() {
            Some(reply) => reply,
            None => Ok(MockLlmProvider::text_response(
                "I'm a mock LLM. No queued responses available.",
            )),
        }
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }
}

/// Pull the first complete JSON object out of a model reply.
///
/// Models often wrap JSON in prose or markdown fences, and the prose may
/// itself contain braces. Each `{` is tried as a start offset and the
/// streaming deserializer stops at the end of the first value, so trailing
/// text never spoils a well-formed object.
pub fn extract_json(response: &str) -> Option<serde_json::Value> {
    response.match_indices('{').find_map(|(start, _)| {
        serde_json::Deserializer::from_str(&response[start..])
            .into_iter::<serde_json::Value>()
            .next()
            .and_then(|parsed| parsed.ok())
            .filter(serde_json::Value::is_object)
    })
}

/// Escape and truncate untrusted text for inclusion in a prompt.
///
/// - Truncates to `max_len` characters (by char count, not bytes)
/// - Replaces `<` and `>` with entities so corpus text cannot close delimiter tags
/// - Strips control characters except `\n` and `\t`
pub fn escape_for_prompt(input: &str, max_len: usize) -> String {
    let mut result = String::with_capacity(input.len().min(max_len));
    for ch in input.chars().take(max_len) {
        match ch {
            '<' => result.push_str("&lt;"),
            '>' => result.push_str("&gt;"),
            c if c.is_control() && c != '\n' && c != '\t' => {}
            c => result.push(c),
        }
    }
    result
}
