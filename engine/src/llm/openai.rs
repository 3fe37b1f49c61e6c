use super::tools::agent_tools;
use super::{read_json, with_cancel, LLMError, LLMProvider, LLMResponse, Message, TokenUsage};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use sdk::types::{collect_text, ContentBlock, Role};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// OpenAI Chat Completions provider
pub struct OpenAIProvider {
    config: ProviderConfig,
    api_key: Option<String>,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
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

    async fn send(&self, payload: Value) -> super::Result<LLMResponse> {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| self.config.api_key())
            .ok_or_else(|| {
                LLMError::AuthenticationFailed(format!("{} is not set", self.config.api_key_env))
            })?;

        let url = format!("{}/chat/completions", self.config.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(LLMError::from_reqwest)?;

        let data = read_json(response).await?;
        parse_response(&data)
    }
}

#[async_trait]
impl LLMProvider for OpenAIProvider {
    fn name(&self) -> &str {
        "openai"
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
        let payload = build_payload(system_prompt, messages, model, tools_enabled, self.max_tokens);
        debug!("OpenAI request: model={}, messages={}", model, messages.len());

        with_cancel(cancel, self.send(payload)).await
    }
}

/// Build a Chat Completions request body.
///
/// Tool results become `tool` role messages in source order. Images cannot
/// travel inside tool messages, so they follow in a user message.
pub(crate) fn build_payload(
    system_prompt: &str,
    messages: &[Message],
    model: &str,
    tools_enabled: bool,
    max_tokens: u32,
) -> Value {
    let mut api_messages = vec![json!({"role": "system", "content": system_prompt})];

    for msg in messages {
        match msg.role {
            Role::Assistant => api_messages.push(assistant_message(&msg.content)),
            Role::User => push_user_blocks(&mut api_messages, &msg.content),
        }
    }

    let mut payload = json!({
        "model": model,
        "max_tokens": max_tokens,
        "messages": api_messages,
    });

    if tools_enabled {
        let tools: Vec<Value> = agent_tools()
            .into_iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    }
                })
            })
            .collect();
        payload["tools"] = Value::Array(tools);
    }

    payload
}

fn assistant_message(blocks: &[ContentBlock]) -> Value {
    let text = collect_text(blocks);
    let tool_calls: Vec<Value> = blocks
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolUse { id, name, input } => Some(json!({
                "id": id,
                "type": "function",
                "function": {"name": name, "arguments": input.to_string()},
            })),
            _ => None,
        })
        .collect();

    let mut message = json!({
        "role": "assistant",
        "content": if text.is_empty() { Value::Null } else { Value::String(text) },
    });
    if !tool_calls.is_empty() {
        message["tool_calls"] = Value::Array(tool_calls);
    }
    message
}

fn push_user_blocks(api_messages: &mut Vec<Value>, blocks: &[ContentBlock]) {
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(json!({"type": "text", "text": text})),
            ContentBlock::Image { media_type, data } => parts.push(image_part(media_type, data)),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let mut text = collect_text(content);
                for inner in content {
                    if let ContentBlock::Image { media_type, data } = inner {
                        parts.push(image_part(media_type, data));
                        if text.is_empty() {
                            text = "Screenshot attached".to_string();
                        }
                    }
                }
                if *is_error {
                    text = format!("ERROR: {}", text);
                }
                api_messages.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": text,
                }));
            }
            ContentBlock::ToolUse { .. } => {
                warn!("Dropping tool_use block found in a user message");
            }
        }
    }

    if !parts.is_empty() {
        api_messages.push(json!({"role": "user", "content": parts}));
    }
}

fn image_part(media_type: &str, data: &str) -> Value {
    json!({
        "type": "image_url",
        "image_url": {"url": format!("data:{};base64,{}", media_type, data)},
    })
}

/// Parse a Chat Completions response body.
pub(crate) fn parse_response(data: &Value) -> super::Result<LLMResponse> {
    let message = data
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("message"))
        .ok_or_else(|| LLMError::ParseError("No message in response".to_string()))?;

    let mut content_blocks = Vec::new();

    if let Some(text) = message.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            content_blocks.push(ContentBlock::text(text));
        }
    }

    if let Some(calls) = message.get("tool_calls").and_then(|c| c.as_array()) {
        for call in calls {
            let id = call.get("id").and_then(|v| v.as_str());
            let function = call.get("function");
            let name = function.and_then(|f| f.get("name")).and_then(|v| v.as_str());
            let (Some(id), Some(name)) = (id, name) else {
                return Err(LLMError::ParseError("tool call without id or name".into()));
            };

            let arguments = function
                .and_then(|f| f.get("arguments"))
                .and_then(|v| v.as_str())
                .unwrap_or("{}");
            let input = serde_json::from_str(arguments).unwrap_or_else(|e| {
                warn!("Tool call {} has unparseable arguments: {}", name, e);
                json!({})
            });

            content_blocks.push(ContentBlock::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            });
        }
    }

    let usage = data.get("usage");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    let mut token_usage = TokenUsage::new(count("prompt_tokens"), count("completion_tokens"));
    if let Some(total) = usage.and_then(|u| u.get("total_tokens")).and_then(|v| v.as_u64()) {
        token_usage.total_tokens = total;
    }

    Ok(LLMResponse {
        content_blocks,
        token_usage,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_tool_results_become_tool_messages_in_order() {
        let messages = vec![
            Message::new(
                Role::Assistant,
                vec![
                    ContentBlock::ToolUse {
                        id: "a".into(),
                        name: "computer_wait".into(),
                        input: json!({"duration": 10}),
                    },
                    ContentBlock::ToolUse {
                        id: "b".into(),
                        name: "computer_screenshot".into(),
                        input: json!({}),
                    },
                ],
            ),
            Message::new(
                Role::User,
                vec![
                    ContentBlock::tool_result("a", "waited", false),
                    ContentBlock::ToolResult {
                        tool_use_id: "b".into(),
                        content: vec![ContentBlock::png("aGk=")],
                        is_error: false,
                    },
                ],
            ),
        ];

        let payload = build_payload("sys", &messages, "gpt", false, 100);
        let wire = payload["messages"].as_array().unwrap();

        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(wire[1]["content"], Value::Null);
        assert_eq!(wire[2]["tool_call_id"], "a");
        assert_eq!(wire[3]["tool_call_id"], "b");
        assert_eq!(wire[3]["content"], "Screenshot attached");
        assert_eq!(wire[4]["role"], "user");
        assert_eq!(wire[4]["content"][0]["type"], "image_url");
    }

    #[test]
    fn test_parse_tool_calls() {
        let data = json!({
            "choices": [{"message": {
                "content": null,
                "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "computer_type_text", "arguments": "{\"text\":\"hi\"}"}
                }]
            }}],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        });

        let response = parse_response(&data).unwrap();
        assert_eq!(
            response.content_blocks,
            vec![ContentBlock::ToolUse {
                id: "call_1".into(),
                name: "computer_type_text".into(),
                input: json!({"text": "hi"}),
            }]
        );
        assert_eq!(response.token_usage.total_tokens, 15);
    }

    #[test]
    fn test_parse_missing_choices() {
        assert!(matches!(
            parse_response(&json!({"choices": []})),
            Err(LLMError::ParseError(_))
        ));
    }

    #[tokio::test]
    async fn test_generate_message_over_http() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "done"}}],
                "usage": {"prompt_tokens": 3, "completion_tokens": 1}
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new(
            ProviderConfig {
                base_url: server.uri(),
                api_key_env: "PILOT_TEST_UNSET_OPENAI".into(),
            },
            256,
            5,
        )
        .with_api_key("sk-test");

        let response = provider
            .generate_message("sys", &[Message::user("hi")], "gpt", true, None)
            .await
            .unwrap();
        assert_eq!(response.content_blocks, vec![ContentBlock::text("done")]);
        assert_eq!(response.token_usage.total_tokens, 4);
    }

    #[tokio::test]
    async fn test_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new(
            ProviderConfig {
                base_url: server.uri(),
                api_key_env: "PILOT_TEST_UNSET_OPENAI".into(),
            },
            256,
            5,
        )
        .with_api_key("sk-test");

        let err = provider
            .generate_message("sys", &[Message::user("hi")], "gpt", false, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LLMError::RateLimitExceeded));
    }
}
