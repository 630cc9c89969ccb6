use async_trait::async_trait;
use demopilot_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use demopilot_core::{Error, ProviderSettings, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::Provider;

/// Find the largest byte index <= `max_bytes` that is a valid char boundary.
fn truncate_at_char_boundary(s: &str, max_bytes: usize) -> usize {
    if max_bytes >= s.len() {
        return s.len();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// OpenAI-compatible chat-completions client with native tool calling.
pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
}

impl OpenAIProvider {
    pub fn new(settings: &ProviderSettings) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build HTTP client, using default");
                Client::new()
            });
        Self {
            client,
            api_key: settings.api_key.clone(),
            api_base: settings.api_base.trim_end_matches('/').to_string(),
            model: settings.model.clone(),
            max_tokens: settings.max_tokens,
            temperature: settings.temperature,
        }
    }

    async fn send_request(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);

        let request = ChatRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            tool_choice: if tools.is_empty() {
                None
            } else {
                Some("auto".to_string())
            },
            max_tokens: self.max_tokens,
            temperature: self.temperature,
        };

        info!(url = %url, model = %self.model, tools_count = tools.len(), messages_count = messages.len(), "Calling LLM");

        let request_body = serde_json::to_string(&request)
            .map_err(|e| Error::Provider(format!("Failed to serialize request: {}", e)))?;
        debug!(body_len = request_body.len(), "Request body prepared");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .body(request_body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Request failed: {}", e)))?;

        let status = response.status();
        let raw_body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(status = %status, body = %raw_body, "LLM API error");
            return Err(Error::Provider(format!("API error {}: {}", status, raw_body)));
        }

        {
            let end = truncate_at_char_boundary(&raw_body, 500);
            debug!(body_len = raw_body.len(), preview = %&raw_body[..end], "LLM raw response");
        }

        serde_json::from_str(&raw_body).map_err(|e| {
            let end = truncate_at_char_boundary(&raw_body, 500);
            Error::Provider(format!("Failed to parse response: {}. Body: {}", e, &raw_body[..end]))
        })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    id: String,
    function: FunctionCall,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    arguments: String,
}

fn convert_tool_calls(raw: Vec<ToolCall>) -> Vec<ToolCallRequest> {
    raw.into_iter()
        .map(|tc| {
            let arguments: Value = serde_json::from_str(&tc.function.arguments)
                .unwrap_or_else(|e| {
                    warn!(error = %e, tool = %tc.function.name, "Malformed tool call arguments, using empty object");
                    Value::Object(serde_json::Map::new())
                });
            ToolCallRequest {
                id: tc.id,
                name: tc.function.name,
                arguments,
            }
        })
        .collect()
}

#[async_trait]
impl Provider for OpenAIProvider {
    async fn chat(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse> {
        let response = self.send_request(messages, tools).await?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("No choices in response".to_string()))?;

        let content = choice.message.content.unwrap_or_default();
        let tool_calls = convert_tool_calls(choice.message.tool_calls.unwrap_or_default());

        Ok(LLMResponse {
            content: if content.is_empty() { None } else { Some(content) },
            tool_calls,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_truncate_at_char_boundary() {
        assert_eq!(truncate_at_char_boundary("hello", 10), 5);
        assert_eq!(truncate_at_char_boundary("hello", 3), 3);
        // Multi-byte char must not be split.
        let s = "ab\u{00e9}cd";
        let end = truncate_at_char_boundary(s, 3);
        assert!(s.is_char_boundary(end));
    }

    #[test]
    fn test_response_parsing_with_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "open_webpage",
                            "arguments": "{\"website_url\": \"https://example.com\"}"
                        }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        })
        .to_string();

        let parsed: ChatResponse = serde_json::from_str(&body).unwrap();
        let choice = parsed.choices.into_iter().next().unwrap();
        let calls = convert_tool_calls(choice.message.tool_calls.unwrap());
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "open_webpage");
        assert_eq!(calls[0].arguments["website_url"], "https://example.com");
    }

    #[test]
    fn test_malformed_arguments_degrade_to_empty_object() {
        let calls = convert_tool_calls(vec![ToolCall {
            id: "call_1".to_string(),
            function: FunctionCall {
                name: "report_outcome".to_string(),
                arguments: "{broken".to_string(),
            },
        }]);
        assert!(calls[0].arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_request_serialization_skips_empty_tools() {
        let request = ChatRequest {
            model: "gpt-4o".to_string(),
            messages: vec![ChatMessage::user("hi")],
            tools: vec![],
            tool_choice: None,
            max_tokens: 256,
            temperature: 0.7,
        };
        let wire = serde_json::to_value(&request).unwrap();
        assert!(wire.get("tools").is_none());
        assert!(wire.get("tool_choice").is_none());
    }
}
