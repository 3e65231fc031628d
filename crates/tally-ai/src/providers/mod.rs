//! Completion provider implementations

pub mod openai;

use crate::{CompletionOptions, Context, Error, MessageEventStream, Model, Result};
use async_trait::async_trait;

/// Trait for completion providers
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream a response from the model
    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &CompletionOptions,
    ) -> Result<MessageEventStream>;

    /// Request a single, non-streamed response and return its text
    async fn complete(
        &self,
        model: &Model,
        context: &Context,
        options: &CompletionOptions,
    ) -> Result<String>;
}

/// Get an API key from the provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.trim().is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or(Error::InvalidApiKey)
}
