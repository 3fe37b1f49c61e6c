use super::tools::{agent_tools, ToolDefinition};
use super::{read_json, with_cancel, LLMError, LLMProvider, LLMResponse, Message, TokenUsage};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use sdk::types::{ContentBlock, Role};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Anthropic Messages API provider
pub struct AnthropicProvider {
    config: ProviderConfig,
    api_key: Option<String>,
    max_tokens: u32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(config: ProviderConfig, max_tokens: u32, timeout_secs: u64) -> Self {
        Self {
            config,
            api_key: None,
            max_tokens,
            client: super::http_client(timeout_secs),
        }
    }

    /// Use an explicit key instead of the configured environment variable
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    fn resolve_key(&self) -> super::Result<String> {
        self.api_key
            .clone()
            .or_else(|| self.config.api_key())
            .ok_or_else(|| {
                LLMError::AuthenticationFailed(format!("{} is not set", self.config.api_key_env))
            })
    }

    fn build_payload(
        &self,
        system_prompt: &str,
        messages: &[Message],
        model: &str,
        tools_enabled: bool,
    ) -> Value {
        let api_messages: Vec<Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": if msg.role == Role::Assistant { "assistant" } else { "user" },
                    "content": msg.content.iter().map(to_wire_block).collect::<Vec<_>>(),
                })
            })
            .collect();

        let mut payload = json!({
            "model": model,
            "max_tokens": self.max_tokens,
            "system": system_prompt,
            "messages": api_messages,
        });

        if tools_enabled {
            payload["tools"] = Value::Array(agent_tools().iter().map(to_wire_tool).collect());
        }

        payload
    }

    async fn send(&self, payload: Value) -> super::Result<LLMResponse> {
        let api_key = self.resolve_key()?;
        let url = format!("{}/messages", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", "2023-06-01")
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(LLMError::from_reqwest)?;

        let data = read_json(response).await?;
        parse_response(&data)
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some() || self.config.api_key().is_some()
    }

    async fn generate_message(
        &self,
        system_prompt: &str,
        messages: &[Message],
        model: &str,
        tools_enabled: bool,
        cancel: Option<&CancellationToken>,
    ) -> super::Result<LLMResponse> {
        let payload = self.build_payload(system_prompt, messages, model, tools_enabled);
        debug!("Anthropic request: model={}, messages={}", model, messages.len());

        with_cancel(cancel, self.send(payload)).await
    }
}

fn to_wire_tool(tool: &ToolDefinition) -> Value {
    json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.input_schema,
    })
}

fn to_wire_block(block: &ContentBlock) -> Value {
    match block {
        ContentBlock::Text { text } => json!({"type": "text", "text": text}),
        ContentBlock::Image { media_type, data } => json!({
            "type": "image",
            "source": {"type": "base64", "media_type": media_type, "data": data},
        }),
        ContentBlock::ToolUse { id, name, input } => json!({
            "type": "tool_use",
            "id": id,
            "name": name,
            "input": input,
        }),
        ContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => json!({
            "type": "tool_result",
            "tool_use_id": tool_use_id,
            "content": content.iter().map(to_wire_block).collect::<Vec<_>>(),
            "is_error": is_error,
        }),
    }
}

fn parse_response(data: &Value) -> super::Result<LLMResponse> {
    let content_arr = data
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LLMError::ParseError("No content array in response".to_string()))?;

    let mut content_blocks = Vec::with_capacity(content_arr.len());
    for item in content_arr {
        match item.get("type").and_then(|t| t.as_str()) {
            Some("text") => {
                let text = item.get("text").and_then(|t| t.as_str()).unwrap_or_default();
                content_blocks.push(ContentBlock::text(text));
            }
            Some("tool_use") => {
                let id = item.get("id").and_then(|v| v.as_str());
                let name = item.get("name").and_then(|v| v.as_str());
                match (id, name) {
                    (Some(id), Some(name)) => content_blocks.push(ContentBlock::ToolUse {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: item.get("input").cloned().unwrap_or_else(|| json!({})),
                    }),
                    _ => return Err(LLMError::ParseError("tool_use without id or name".into())),
                }
            }
            other => warn!("Skipping Anthropic content block of type {:?}", other),
        }
    }

    let usage = data.get("usage");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };

    Ok(LLMResponse {
        content_blocks,
        token_usage: TokenUsage::new(count("input_tokens"), count("output_tokens")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: String) -> AnthropicProvider {
        AnthropicProvider::new(
            ProviderConfig {
                base_url,
                api_key_env: "PILOT_TEST_UNSET_ANTHROPIC".to_string(),
            },
            1024,
            5,
        )
        .with_api_key("test-key")
    }

    #[tokio::test]
    async fn test_generate_message_parses_blocks_and_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/messages"))
            .and(header("x-api-key", "test-key"))
            .and(body_partial_json(json!({"model": "claude-test", "system": "be brief"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [
                    {"type": "text", "text": "Taking a screenshot"},
                    {"type": "tool_use", "id": "tu_1", "name": "computer_screenshot", "input": {}}
                ],
                "usage": {"input_tokens": 100, "output_tokens": 20}
            })))
            .mount(&server)
            .await;

        let response = provider(server.uri())
            .generate_message("be brief", &[Message::user("hi")], "claude-test", true, None)
            .await
            .unwrap();

        assert_eq!(response.content_blocks.len(), 2);
        assert!(response.content_blocks[1].is_tool_use());
        assert_eq!(response.token_usage.total_tokens, 120);
    }

    #[tokio::test]
    async fn test_auth_failure_maps_to_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let err = provider(server.uri())
            .generate_message("", &[Message::user("hi")], "m", false, None)
            .await
            .unwrap_err();

        assert!(matches!(err, LLMError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_missing_key_fails_without_request() {
        let provider = AnthropicProvider::new(
            ProviderConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key_env: "PILOT_TEST_UNSET_ANTHROPIC".to_string(),
            },
            1024,
            5,
        );
        assert!(!provider.is_configured());

        let err = provider
            .generate_message("", &[], "m", false, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("PILOT_TEST_UNSET_ANTHROPIC"));
    }

    #[test]
    fn test_tool_result_wire_shape() {
        let block = ContentBlock::ToolResult {
            tool_use_id: "tu_1".into(),
            content: vec![ContentBlock::png("aGk=")],
            is_error: false,
        };
        let wire = to_wire_block(&block);
        assert_eq!(wire["content"][0]["source"]["type"], "base64");
        assert_eq!(wire["content"][0]["source"]["media_type"], "image/png");
    }

    #[test]
    fn test_tools_only_when_enabled() {
        let p = provider("http://localhost".into());
        let with = p.build_payload("", &[], "m", true);
        let without = p.build_payload("", &[], "m", false);
        assert!(with["tools"].as_array().map(|t| !t.is_empty()).unwrap_or(false));
        assert!(without.get("tools").is_none());
    }
}
