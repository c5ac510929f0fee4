//! Reasoning provider abstractions.
//!
//! A provider takes the prompt, system instruction and inline media and
//! returns the model's answer as JSON text. Everything after that is the
//! deterministic pipeline in `medmind-core`.
//!
//! ## Security
//!
//! Providers load keys through the [`secrets`] module. See [`ApiCredential`].

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

use crate::media::MediaPart;

mod factory;
pub mod gemini;
pub mod secrets;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use gemini::{GeminiProvider, GeminiProviderFactory};
pub use secrets::{ApiCredential, CredentialSource, GEMINI_API_KEY_ENV};

/// Delay before the single retry after HTTP 429.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(2);

/// Errors from reasoning providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Provider returned no content")]
    EmptyResponse,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Settings for one generation call.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub model: String,

    pub max_output_tokens: u32,

    /// `None` leaves the provider's default in place.
    pub temperature: Option<f32>,

    /// Per-request HTTP timeout.
    pub timeout: Duration,

    /// JSON schema the answer must follow.
    pub response_schema: Option<serde_json::Value>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: gemini::DEFAULT_MODEL.to_string(),
            max_output_tokens: 8192,
            temperature: None,
            timeout: Duration::from_secs(60),
            response_schema: None,
        }
    }
}

/// What is sent to the reasoning service.
#[derive(Debug, Clone, Default)]
pub struct ReasoningRequest {
    pub system_instruction: String,
    pub prompt: String,
    /// Sent after the prompt, in order.
    pub media: Vec<MediaPart>,
}

/// The reasoning service's answer.
#[derive(Debug, Clone)]
pub struct ReasoningResponse {
    /// Answer text, expected to be a JSON document.
    pub text: String,

    pub model: String,

    pub finish_reason: Option<String>,

    pub usage: TokenUsage,
}

/// Token usage reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Provider abstraction so the reasoning backend can be swapped.
///
/// This is the only place the runtime reaches the network.
#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn generate(
        &self,
        request: &ReasoningRequest,
        config: &GenerationConfig,
    ) -> Result<ReasoningResponse, ProviderError>;

    fn name(&self) -> &str;
}

/// Run `op`, retrying once after [`RATE_LIMIT_BACKOFF`] if it is rate limited.
///
/// Any other error is returned immediately.
pub async fn retry_rate_limited<T, F, Fut>(op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    op.retry(
        ExponentialBuilder::default()
            .with_min_delay(RATE_LIMIT_BACKOFF)
            .with_max_times(1),
    )
    .when(|e| matches!(e, ProviderError::RateLimited { .. }))
    .notify(|e, delay| tracing::warn!(error = %e, ?delay, "Reasoning service rate limited, retrying"))
    .await
}
