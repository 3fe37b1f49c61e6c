//! Capability Provider Abstraction Layer
//!
//! Every LLM backend (Anthropic, OpenAI, Google, an OpenAI-compatible proxy)
//! is exposed through the single `LLMProvider` trait. A provider takes the
//! conversation as content blocks and returns the next assistant turn as
//! content blocks plus token usage. The orchestrator selects a provider by the
//! string key stored in a task's model descriptor (see `registry`).
//!
//! Every call accepts an optional cancellation token. When the token fires the
//! call fails fast with `LLMError::Interrupted`.

use async_trait::async_trait;
use sdk::types::{ContentBlock, Role};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::db::StoredMessage;

pub mod anthropic;
pub mod google;
pub mod mock;
pub mod openai;
pub mod proxy;
pub mod registry;
pub mod tools;

pub use registry::ProviderRegistry;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during LLM operations
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout")]
    Timeout,

    #[error("Parse error: {0}")]
    ParseError(String),

    /// The caller's cancellation token fired mid-call
    #[error("Request interrupted")]
    Interrupted,
}

impl LLMError {
    /// Map a non-success HTTP status to an error.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => LLMError::AuthenticationFailed(body),
            429 => LLMError::RateLimitExceeded,
            400 | 404 | 422 => LLMError::InvalidRequest(body),
            _ => LLMError::ProviderUnavailable(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Map a transport-level reqwest failure.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LLMError::Timeout
        } else {
            LLMError::NetworkError(err.to_string())
        }
    }
}

/// One conversation turn handed to a provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    pub fn new(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Create a user message with a single text block
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, vec![ContentBlock::text(text)])
    }

    /// Create an assistant message with a single text block
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, vec![ContentBlock::text(text)])
    }
}

impl From<StoredMessage> for Message {
    fn from(stored: StoredMessage) -> Self {
        Self::new(stored.role, stored.content)
    }
}

impl From<&StoredMessage> for Message {
    fn from(stored: &StoredMessage) -> Self {
        Self::new(stored.role, stored.content.clone())
    }
}

/// Token accounting reported by the provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }
}

/// The next assistant turn
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LLMResponse {
    pub content_blocks: Vec<ContentBlock>,
    pub token_usage: TokenUsage,
}

/// Capability provider trait that all backends implement
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Registry key of the provider (e.g. "anthropic", "openai", "google", "proxy")
    fn name(&self) -> &str;

    /// Whether credentials for this provider are available
    fn is_configured(&self) -> bool {
        true
    }

    /// Generate the next assistant turn
    ///
    /// # Arguments
    /// * `system_prompt` - Instruction prepended by the provider in its native way
    /// * `messages` - Conversation in chronological order
    /// * `model` - Provider-specific model name
    /// * `tools_enabled` - Whether to offer the agent tool catalogue
    /// * `cancel` - Fires to abort the request; yields `LLMError::Interrupted`
    async fn generate_message(
        &self,
        system_prompt: &str,
        messages: &[Message],
        model: &str,
        tools_enabled: bool,
        cancel: Option<&CancellationToken>,
    ) -> Result<LLMResponse>;
}

/// Race a request against an optional cancellation token.
///
/// A token that has already fired short-circuits before the request starts.
pub async fn with_cancel<T, F>(cancel: Option<&CancellationToken>, request: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match cancel {
        Some(token) => {
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(LLMError::Interrupted),
                result = request => result,
            }
        }
        None => request.await,
    }
}

/// Build a reqwest client with a whole-request timeout.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_default()
}

/// Read the body of a response, mapping non-success statuses to errors.
pub(crate) async fn read_json(response: reqwest::Response) -> Result<serde_json::Value> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(LLMError::from_status(status, text));
    }

    response
        .json()
        .await
        .map_err(|e| LLMError::ParseError(e.to_string()))
}
