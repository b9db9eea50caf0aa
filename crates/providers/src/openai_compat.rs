//! OpenAI-compatible chat-completions adapter (OpenAI, and any endpoint
//! speaking the same wire format).

use serde_json::Value;

use minder_domain::message::{ChatMessage, ContentPart, MessageContent, Role};
use minder_domain::tool::{ToolCall, ToolDefinition};
use minder_domain::usage::TokenUsage;

use crate::anthropic::{is_overflow_body, parse_retry_after, truncate};
use crate::traits::{with_cancellation, ChatRequest, ChatResponse, LlmClient, LlmError, LlmResult};

pub struct OpenAiCompatClient {
    provider_id: String,
    base_url: String,
    api_key: String,
    default_model: String,
    client: reqwest::Client,
}

impl OpenAiCompatClient {
    pub fn new(
        provider_id: &str,
        base_url: &str,
        api_key: String,
        default_model: String,
    ) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| LlmError::Provider {
                provider: provider_id.into(),
                message: e.to_string(),
            })?;
        Ok(Self {
            provider_id: provider_id.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            default_model,
            client,
        })
    }

    fn err(&self, message: String) -> LlmError {
        LlmError::Provider {
            provider: self.provider_id.clone(),
            message,
        }
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
        });
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| tool_to_wire(t))
                .collect();
            body["tools"] = Value::Array(tools);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        body
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn complete(&self, req: &ChatRequest) -> LlmResult<ChatResponse> {
        let body = self.build_body(req);
        let url = format!("{}/chat/completions", self.base_url);

        let fut = async {
            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| self.err(e.to_string()))?;

            let status = resp.status();
            let retry_header = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            let text = resp.text().await.map_err(|e| self.err(e.to_string()))?;

            if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                return Err(LlmError::RateLimited {
                    retry_after: retry_header.or_else(|| parse_retry_after(&text)),
                });
            }
            if !status.is_success() {
                if is_overflow_body(&text) {
                    return Err(LlmError::ContextOverflow(truncate(&text, 300)));
                }
                return Err(self.err(format!("HTTP {status}: {}", truncate(&text, 300))));
            }

            let json: Value =
                serde_json::from_str(&text).map_err(|e| self.err(e.to_string()))?;
            parse_response(&json)
        };

        with_cancellation(req.cancel.as_ref(), fut).await
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire conversion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn message_to_wire(msg: &ChatMessage) -> Value {
    match msg.role {
        Role::System => serde_json::json!({
            "role": "system", "content": msg.content.joined_text()
        }),
        Role::User => serde_json::json!({
            "role": "user", "content": msg.content.joined_text()
        }),
        Role::Assistant => {
            let tool_calls: Vec<Value> = msg
                .content
                .tool_uses()
                .iter()
                .map(|tc| {
                    serde_json::json!({
                        "id": tc.id,
                        "type": "function",
                        "function": {
                            "name": tc.name,
                            "arguments": tc.arguments.to_string(),
                        }
                    })
                })
                .collect();
            let mut wire = serde_json::json!({
                "role": "assistant",
                "content": msg.content.joined_text(),
            });
            if !tool_calls.is_empty() {
                wire["tool_calls"] = Value::Array(tool_calls);
            }
            wire
        }
        Role::Tool => {
            // One wire message per tool_result part.
            let (id, content) = match &msg.content {
                MessageContent::Parts(parts) => parts
                    .iter()
                    .find_map(|p| match p {
                        ContentPart::ToolResult {
                            tool_call_id,
                            content,
                            ..
                        } => Some((tool_call_id.clone(), content.clone())),
                        _ => None,
                    })
                    .unwrap_or_default(),
                MessageContent::Text(t) => (String::new(), t.clone()),
            };
            serde_json::json!({
                "role": "tool",
                "tool_call_id": id,
                "content": content,
            })
        }
    }
}

fn tool_to_wire(def: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": def.name,
            "description": def.description,
            "parameters": def.parameters,
        }
    })
}

fn parse_response(json: &Value) -> LlmResult<ChatResponse> {
    let choice = &json["choices"][0];
    let message = &choice["message"];

    let mut tool_calls = Vec::new();
    for tc in message["tool_calls"].as_array().into_iter().flatten() {
        let arguments = tc["function"]["arguments"]
            .as_str()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| Value::Object(Default::default()));
        tool_calls.push(ToolCall {
            id: tc["id"].as_str().unwrap_or_default().to_string(),
            name: tc["function"]["name"].as_str().unwrap_or_default().to_string(),
            arguments,
        });
    }

    Ok(ChatResponse {
        content: message["content"].as_str().unwrap_or_default().to_string(),
        thinking: None,
        tool_calls,
        usage: TokenUsage {
            prompt_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0) as u32,
            completion_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0) as u32,
        },
        model: json["model"].as_str().unwrap_or_default().to_string(),
        finish_reason: choice["finish_reason"].as_str().map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tool_calls_with_string_arguments() {
        let json = serde_json::json!({
            "model": "gpt-4o-mini",
            "usage": {"prompt_tokens": 9, "completion_tokens": 3},
            "choices": [{
                "finish_reason": "tool_calls",
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "shell", "arguments": "{\"command\":\"ls\"}"}
                    }]
                }
            }]
        });
        let resp = parse_response(&json).unwrap();
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].name, "shell");
        assert_eq!(resp.tool_calls[0].arguments["command"], "ls");
        assert_eq!(resp.content, "");
    }

    #[test]
    fn malformed_arguments_default_to_empty_object() {
        let json = serde_json::json!({
            "choices": [{
                "message": {
                    "tool_calls": [{
                        "id": "call_1",
                        "function": {"name": "shell", "arguments": "not json"}
                    }]
                }
            }],
            "usage": {}
        });
        let resp = parse_response(&json).unwrap();
        assert!(resp.tool_calls[0].arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn assistant_tool_calls_roundtrip_to_wire() {
        let msg = ChatMessage::assistant_with_calls(
            "checking",
            &[ToolCall {
                id: "call_9".into(),
                name: "read_file".into(),
                arguments: serde_json::json!({"path": "x"}),
            }],
        );
        let wire = message_to_wire(&msg);
        assert_eq!(wire["role"], "assistant");
        assert_eq!(wire["tool_calls"][0]["id"], "call_9");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "read_file");
    }
}
