//! OpenAI-compatible gateway provider
//!
//! Talks to any Chat Completions compatible proxy (LiteLLM and friends) at a
//! configurable base URL. The model name is passed through untouched so the
//! gateway can route it. An API key is optional.

use super::openai::{build_payload, parse_response};
use super::{read_json, with_cancel, LLMError, LLMProvider, LLMResponse, Message};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct ProxyProvider {
    config: ProviderConfig,
    max_tokens: u32,
    client: reqwest::Client,
}

impl ProxyProvider {
    pub fn new(config: ProviderConfig, max_tokens: u32, timeout_secs: u64) -> Self {
        Self {
            config,
            max_tokens,
            client: super::http_client(timeout_secs),
        }
    }

    async fn send(&self, payload: Value) -> super::Result<LLMResponse> {
        let url = format!("{}/chat/completions", self.config.base_url);

        let mut request = self.client.post(&url).json(&payload);
        if let Some(api_key) = self.config.api_key() {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(LLMError::from_reqwest)?;
        let data = read_json(response).await?;
        parse_response(&data)
    }
}

#[async_trait]
impl LLMProvider for ProxyProvider {
    fn name(&self) -> &str {
        "proxy"
    }

    async fn generate_message(
        &self,
        system_prompt: &str,
        messages: &[Message],
        model: &str,
        tools_enabled: bool,
        cancel: Option<&CancellationToken>,
    ) -> super::Result<LLMResponse> {
        let payload = build_payload(system_prompt, messages, model, tools_enabled, self.max_tokens);
        debug!(
            "Proxy request to {}: model={}, messages={}",
            self.config.base_url,
            model,
            messages.len()
        );

        with_cancel(cancel, self.send(payload)).await
    }
}
