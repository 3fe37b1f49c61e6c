use super::tools::agent_tools;
use super::{read_json, with_cancel, LLMError, LLMProvider, LLMResponse, Message, TokenUsage};
use crate::config::ProviderConfig;
use async_trait::async_trait;
use sdk::types::{collect_text, ContentBlock, Role};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Google Gemini generateContent provider
pub struct GoogleProvider {
    config: ProviderConfig,
    api_key: Option<String>,
    max_tokens: u32,
    client: reqwest::Client,
}

impl GoogleProvider {
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

    fn build_payload(&self, system_prompt: &str, messages: &[Message], tools_enabled: bool) -> Value {
        let contents: Vec<Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": if msg.role == Role::User { "user" } else { "model" },
                    "parts": to_parts(&msg.content, messages),
                })
            })
            .collect();

        let mut payload = json!({
            "contents": contents,
            "systemInstruction": {"parts": [{"text": system_prompt}]},
            "generationConfig": {"maxOutputTokens": self.max_tokens},
        });

        if tools_enabled {
            let declarations: Vec<Value> = agent_tools()
                .into_iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    })
                })
                .collect();
            payload["tools"] = json!([{"functionDeclarations": declarations}]);
        }

        payload
    }

    async fn send(&self, model: &str, payload: Value) -> super::Result<LLMResponse> {
        let api_key = self
            .api_key
            .clone()
            .or_else(|| self.config.api_key())
            .ok_or_else(|| {
                LLMError::AuthenticationFailed(format!("{} is not set", self.config.api_key_env))
            })?;

        let url = format!("{}/models/{}:generateContent", self.config.base_url, model);

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(&payload)
            .send()
            .await
            .map_err(LLMError::from_reqwest)?;

        let data = read_json(response).await?;
        parse_response(&data)
    }
}

#[async_trait]
impl LLMProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
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
        let payload = self.build_payload(system_prompt, messages, tools_enabled);
        debug!("Gemini request: model={}, messages={}", model, messages.len());

        with_cancel(cancel, self.send(model, payload)).await
    }
}

/// Gemini function responses carry the function name, not the call id.
fn tool_name_for(tool_use_id: &str, messages: &[Message]) -> Option<String> {
    messages
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|block| match block {
            ContentBlock::ToolUse { id, name, .. } if id == tool_use_id => Some(name.clone()),
            _ => None,
        })
}

fn to_parts(blocks: &[ContentBlock], messages: &[Message]) -> Vec<Value> {
    let mut parts = Vec::new();

    for block in blocks {
        match block {
            ContentBlock::Text { text } => parts.push(json!({"text": text})),
            ContentBlock::Image { media_type, data } => parts.push(json!({
                "inlineData": {"mimeType": media_type, "data": data}
            })),
            ContentBlock::ToolUse { id, name, input } => parts.push(json!({
                "functionCall": {"id": id, "name": name, "args": input}
            })),
            ContentBlock::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let name = tool_name_for(tool_use_id, messages)
                    .unwrap_or_else(|| "unknown_tool".to_string());
                let mut text = collect_text(content);
                let images: Vec<&ContentBlock> = content
                    .iter()
                    .filter(|b| matches!(b, ContentBlock::Image { .. }))
                    .collect();
                if text.is_empty() && !images.is_empty() {
                    text = "screenshot successful".to_string();
                }

                let response = if *is_error {
                    json!({"error": text})
                } else {
                    json!({"output": text})
                };
                parts.push(json!({
                    "functionResponse": {"id": tool_use_id, "name": name, "response": response}
                }));

                for image in images {
                    if let ContentBlock::Image { media_type, data } = image {
                        parts.push(json!({
                            "inlineData": {"mimeType": media_type, "data": data}
                        }));
                    }
                }
            }
        }
    }

    parts
}

fn parse_response(data: &Value) -> super::Result<LLMResponse> {
    let parts = data
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or_else(|| LLMError::ParseError("No candidates in response".to_string()))?
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
        .ok_or_else(|| LLMError::ParseError("No parts in candidate content".to_string()))?;

    let mut content_blocks = Vec::with_capacity(parts.len());
    for part in parts {
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            content_blocks.push(ContentBlock::text(text));
        } else if let Some(call) = part.get("functionCall") {
            let name = call
                .get("name")
                .and_then(|n| n.as_str())
                .ok_or_else(|| LLMError::ParseError("functionCall without name".into()))?;
            let id = call
                .get("id")
                .and_then(|i| i.as_str())
                .map(String::from)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            content_blocks.push(ContentBlock::ToolUse {
                id,
                name: name.to_string(),
                input: call.get("args").cloned().unwrap_or_else(|| json!({})),
            });
        } else {
            warn!("Unknown content part from Gemini: {}", part);
        }
    }

    let usage = data.get("usageMetadata");
    let count = |key: &str| {
        usage
            .and_then(|u| u.get(key))
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    let mut token_usage = TokenUsage::new(count("promptTokenCount"), count("candidatesTokenCount"));
    if let Some(total) = usage
        .and_then(|u| u.get("totalTokenCount"))
        .and_then(|v| v.as_u64())
    {
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
    fn test_function_response_uses_tool_name() {
        let messages = vec![
            Message::new(
                Role::Assistant,
                vec![ContentBlock::ToolUse {
                    id: "tu_9".into(),
                    name: "computer_cursor_position".into(),
                    input: json!({}),
                }],
            ),
            Message::new(
                Role::User,
                vec![ContentBlock::tool_result("tu_9", "Cursor position: 1, 2", false)],
            ),
        ];

        let parts = to_parts(&messages[1].content, &messages);
        assert_eq!(
            parts[0]["functionResponse"]["name"],
            "computer_cursor_position"
        );
        assert_eq!(
            parts[0]["functionResponse"]["response"]["output"],
            "Cursor position: 1, 2"
        );
    }

    #[test]
    fn test_error_result_and_screenshot_parts() {
        let blocks = vec![
            ContentBlock::tool_result("x", "boom", true),
            ContentBlock::ToolResult {
                tool_use_id: "y".into(),
                content: vec![ContentBlock::png("aGk=")],
                is_error: false,
            },
        ];
        let parts = to_parts(&blocks, &[]);
        assert_eq!(parts[0]["functionResponse"]["response"]["error"], "boom");
        assert_eq!(parts[1]["functionResponse"]["response"]["output"], "screenshot successful");
        assert_eq!(parts[2]["inlineData"]["mimeType"], "image/png");
    }

    #[tokio::test]
    async fn test_generate_message_assigns_missing_call_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/gemini-test:generateContent"))
            .and(header("x-goog-api-key", "g-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "candidates": [{"content": {"role": "model", "parts": [
                    {"text": "Looking"},
                    {"functionCall": {"name": "computer_screenshot", "args": {}}}
                ]}}],
                "usageMetadata": {"promptTokenCount": 40, "candidatesTokenCount": 2, "totalTokenCount": 42}
            })))
            .mount(&server)
            .await;

        let provider = GoogleProvider::new(
            ProviderConfig {
                base_url: server.uri(),
                api_key_env: "PILOT_TEST_UNSET_GOOGLE".into(),
            },
            512,
            5,
        )
        .with_api_key("g-key");

        let response = provider
            .generate_message("sys", &[Message::user("hi")], "gemini-test", true, None)
            .await
            .unwrap();

        assert_eq!(response.content_blocks.len(), 2);
        match &response.content_blocks[1] {
            ContentBlock::ToolUse { id, name, .. } => {
                assert!(!id.is_empty());
                assert_eq!(name, "computer_screenshot");
            }
            other => panic!("expected tool use, got {:?}", other),
        }
        assert_eq!(response.token_usage.total_tokens, 42);
    }

    #[test]
    fn test_no_candidates() {
        assert!(matches!(
            parse_response(&json!({"candidates": []})),
            Err(LLMError::ParseError(_))
        ));
    }
}
