//! Anthropic Messages API adapter.
//!
//! System messages go into the top-level `system` field, tool results are
//! sent as user messages with `tool_result` content blocks, and rate-limit
//! / overflow responses are mapped onto the normalized error kinds.

use serde_json::Value;

use minder_domain::message::{ChatMessage, ContentPart, MessageContent, Role};
use minder_domain::tool::{ToolCall, ToolDefinition};
use minder_domain::usage::TokenUsage;

use crate::traits::{with_cancellation, ChatRequest, ChatResponse, LlmClient, LlmError, LlmResult};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 8192;

pub struct AnthropicClient {
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl AnthropicClient {
    pub fn new(base_url: &str, api_key: String, default_model: String) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| provider_err(e.to_string()))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.joined_text()),
                Role::User => api_messages.push(user_to_wire(msg)),
                Role::Assistant => api_messages.push(assistant_to_wire(msg)),
                // Tool results are user messages with tool_result blocks.
                Role::Tool => api_messages.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        });
        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmClient for AnthropicClient {
    async fn complete(&self, req: &ChatRequest) -> LlmResult<ChatResponse> {
        let body = self.build_body(req);
        let url = format!("{}/v1/messages", self.base_url);

        let fut = async {
            let resp = self
                .client
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", ANTHROPIC_VERSION)
                .json(&body)
                .send()
                .await
                .map_err(|e| provider_err(e.to_string()))?;

            let status = resp.status();
            let text = resp
                .text()
                .await
                .map_err(|e| provider_err(e.to_string()))?;

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited {
                    retry_after: parse_retry_after(&text),
                });
            }
            if !status.is_success() {
                if is_overflow_body(&text) {
                    return Err(LlmError::ContextOverflow(truncate(&text, 300)));
                }
                return Err(provider_err(format!("HTTP {status}: {}", truncate(&text, 300))));
            }

            let json: Value =
                serde_json::from_str(&text).map_err(|e| provider_err(e.to_string()))?;
            parse_response(&json)
        };

        with_cancellation(req.cancel.as_ref(), fut).await
    }

    fn provider_id(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn user_to_wire(msg: &ChatMessage) -> Value {
    serde_json::json!({ "role": "user", "content": msg.content.joined_text() })
}

fn assistant_to_wire(msg: &ChatMessage) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => {
                    Some(serde_json::json!({"type": "text", "text": text}))
                }
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use", "id": id, "name": name, "input": input
                })),
                ContentPart::ToolResult { .. } => None,
            })
            .collect(),
    };
    serde_json::json!({ "role": "assistant", "content": content })
}

fn tool_result_to_wire(msg: &ChatMessage) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    tool_call_id,
                    content,
                    is_error,
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_call_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
    };
    serde_json::json!({ "role": "user", "content": content })
}

fn tool_to_wire(def: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": def.name,
        "description": def.description,
        "input_schema": def.parameters,
    })
}

fn parse_response(json: &Value) -> LlmResult<ChatResponse> {
    let mut content = String::new();
    let mut thinking: Option<String> = None;
    let mut tool_calls = Vec::new();

    for block in json["content"].as_array().into_iter().flatten() {
        match block["type"].as_str() {
            Some("text") => {
                if let Some(t) = block["text"].as_str() {
                    content.push_str(t);
                }
            }
            Some("thinking") => {
                if let Some(t) = block["thinking"].as_str() {
                    thinking = Some(t.to_string());
                }
            }
            Some("tool_use") => {
                tool_calls.push(ToolCall {
                    id: block["id"].as_str().unwrap_or_default().to_string(),
                    name: block["name"].as_str().unwrap_or_default().to_string(),
                    arguments: block["input"].clone(),
                });
            }
            _ => {}
        }
    }

    Ok(ChatResponse {
        content,
        thinking,
        tool_calls,
        usage: TokenUsage {
            prompt_tokens: json["usage"]["input_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: json["usage"]["output_tokens"].as_u64().unwrap_or(0) as u32,
        },
        model: json["model"].as_str().unwrap_or_default().to_string(),
        finish_reason: json["stop_reason"].as_str().map(String::from),
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Error mapping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn provider_err(message: String) -> LlmError {
    LlmError::Provider {
        provider: "anthropic".into(),
        message,
    }
}

pub(crate) fn is_overflow_body(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("prompt is too long")
        || lower.contains("context length")
        || lower.contains("maximum context")
        || lower.contains("too many tokens")
}

pub(crate) fn parse_retry_after(body: &str) -> Option<std::time::Duration> {
    let json: Value = serde_json::from_str(body).ok()?;
    let secs = json["error"]["retry_after"].as_f64()?;
    Some(std::time::Duration::from_secs_f64(secs.max(0.0)))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_tool_use_blocks_in_order() {
        let json = serde_json::json!({
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 12, "output_tokens": 34},
            "content": [
                {"type": "text", "text": "let me check"},
                {"type": "tool_use", "id": "tc_1", "name": "shell", "input": {"command": "ls"}},
                {"type": "tool_use", "id": "tc_2", "name": "read_file", "input": {"path": "a"}}
            ]
        });
        let resp = parse_response(&json).unwrap();
        assert_eq!(resp.content, "let me check");
        assert_eq!(resp.tool_calls.len(), 2);
        assert_eq!(resp.tool_calls[0].id, "tc_1");
        assert_eq!(resp.tool_calls[1].id, "tc_2");
        assert_eq!(resp.usage.prompt_tokens, 12);
        assert_eq!(resp.finish_reason.as_deref(), Some("tool_use"));
    }

    #[test]
    fn overflow_detection() {
        assert!(is_overflow_body(r#"{"error":{"message":"prompt is too long: 210000 tokens"}}"#));
        assert!(is_overflow_body("request exceeds the maximum context"));
        assert!(!is_overflow_body(r#"{"error":{"message":"invalid api key"}}"#));
    }

    #[test]
    fn system_messages_become_top_level_field() {
        let client = AnthropicClient::new(
            "https://api.anthropic.com",
            "sk-test".into(),
            "claude-sonnet-4-20250514".into(),
        )
        .unwrap();
        let req = ChatRequest {
            messages: vec![
                ChatMessage::system("you are a helper"),
                ChatMessage::user("hi"),
            ],
            ..Default::default()
        };
        let body = client.build_body(&req);
        assert_eq!(body["system"], "you are a helper");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn tool_results_are_sent_as_user_messages() {
        let msg = ChatMessage::tool_result("tc_1", "output text", false);
        let wire = tool_result_to_wire(&msg);
        assert_eq!(wire["role"], "user");
        assert_eq!(wire["content"][0]["type"], "tool_result");
        assert_eq!(wire["content"][0]["tool_use_id"], "tc_1");
    }
}
