//! Transport abstraction for model calls
//!
//! The agent never talks to a provider directly. It hands a [`RunConfig`] and
//! the conversation to a [`Transport`], which applies the request policy:
//! retries while *opening* a request and an optional client-side rate limit.
//! A stream that fails after it opened is not retried here.

use std::{num::NonZeroU32, sync::Arc, time::Duration};

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use tally_ai::{
    CompletionOptions, Context, Error, Message, MessageEventStream, Model, Result,
    providers::{LlmProvider, openai::OpenAIProvider},
};
use tokio_util::sync::CancellationToken;

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_retries: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Calculate delay for a given attempt (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_secs =
            self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay_secs.min(self.max_delay.as_secs_f64()))
    }

    /// Delay before retrying `error`, honoring a server-provided retry-after
    fn delay_for_error(&self, attempt: u32, error: &Error) -> Duration {
        let backoff = self.delay_for_attempt(attempt);
        match error {
            Error::RateLimited {
                retry_after: Some(secs),
            } => backoff.max(Duration::from_secs(*secs)).min(self.max_delay),
            _ => backoff,
        }
    }
}

/// Client-side request rate limit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub requests_per_minute: u32,
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            burst: 5,
        }
    }
}

pub type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Build a direct (unkeyed) limiter from a config
pub fn create_limiter(config: RateLimitConfig) -> SharedRateLimiter {
    let per_minute = NonZeroU32::new(config.requests_per_minute).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(config.burst).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute).allow_burst(burst)))
}

/// String fallback for errors whose type lost the retry information
fn is_retryable_error(error: &str) -> bool {
    let lower = error.to_lowercase();
    [
        "429",
        "rate limit",
        "timeout",
        "timed out",
        "connection",
        "500",
        "502",
        "503",
        "504",
        "overloaded",
    ]
    .iter()
    .any(|needle| lower.contains(needle))
}

/// Per-request settings
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Declared tools (empty for summarization calls)
    pub tools: Vec<tally_ai::Tool>,
    /// Model to use
    pub model: Model,
    /// Credential for the endpoint
    pub api_key: Option<String>,
    /// Sampling temperature
    pub temperature: Option<f32>,
    /// Maximum tokens per response
    pub max_tokens: Option<u32>,
}

impl RunConfig {
    fn context(&self, messages: Vec<Message>) -> Context {
        Context {
            system_prompt: self.system_prompt.clone(),
            messages,
            tools: self.tools.clone(),
        }
    }

    fn options(&self) -> CompletionOptions {
        CompletionOptions {
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        }
    }
}

/// Transport for model calls
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a streamed completion over the given history
    async fn stream(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<MessageEventStream>;

    /// Run a non-streamed completion and return its text
    async fn complete(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<String>;
}

/// Direct provider transport - calls the completion endpoint over HTTP
pub struct ProviderTransport {
    retry_config: RetryConfig,
    limiter: Option<SharedRateLimiter>,
}

impl ProviderTransport {
    /// Create a new provider transport
    pub fn new() -> Self {
        Self {
            retry_config: RetryConfig::default(),
            limiter: None,
        }
    }

    /// Set retry configuration
    pub fn with_retry_config(mut self, config: RetryConfig) -> Self {
        self.retry_config = config;
        self
    }

    /// Limit how often requests are sent
    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.limiter = Some(create_limiter(config));
        self
    }

    fn provider(config: &RunConfig) -> Result<OpenAIProvider> {
        match config.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => Ok(OpenAIProvider::new(key)),
            _ => OpenAIProvider::from_env(),
        }
    }

    /// Run `attempt` with rate limiting and retries, stopping on cancellation.
    async fn with_policy<T, F, Fut>(
        &self,
        cancel: &CancellationToken,
        mut attempt_fn: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: std::future::Future<Output = Result<T>> + Send,
        T: Send,
    {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Aborted);
            }
            if let Some(limiter) = &self.limiter {
                tokio::select! {
                    _ = limiter.until_ready() => {}
                    _ = cancel.cancelled() => return Err(Error::Aborted),
                }
            }

            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    let error_msg = e.to_string();
                    let retryable = e.is_retryable() || is_retryable_error(&error_msg);
                    if attempt >= self.retry_config.max_retries || !retryable {
                        return Err(e);
                    }

                    let delay = self.retry_config.delay_for_error(attempt, &e);
                    tracing::warn!(
                        "Request failed (attempt {}/{}): {}. Retrying in {:?}...",
                        attempt + 1,
                        self.retry_config.max_retries + 1,
                        error_msg,
                        delay
                    );
                    attempt += 1;
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(Error::Aborted),
                    }
                }
            }
        }
    }
}

impl Default for ProviderTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for ProviderTransport {
    async fn stream(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<MessageEventStream> {
        let provider = Self::provider(config)?;
        let context = config.context(messages);
        let options = config.options();
        self.with_policy(&cancel, || provider.stream(&config.model, &context, &options))
            .await
    }

    async fn complete(
        &self,
        messages: Vec<Message>,
        config: &RunConfig,
        cancel: CancellationToken,
    ) -> Result<String> {
        let provider = Self::provider(config)?;
        let context = config.context(messages);
        let options = config.options();
        self.with_policy(&cancel, || provider.complete(&config.model, &context, &options))
            .await
    }
}
